use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExpiryError, Result};
use crate::events::{EventBus, EventPublisher, ExpiryEvent};
use crate::fs::{HiddenFiles, list_regular_files};
use crate::metadata::MetadataStore;
use crate::settings::WatchListStore;
use crate::sweep::{DEFAULT_EXPIRING_LIMIT, ExpirationSweeper, SweeperConfig};
use crate::types::{ExpirationPreset, ExpiringFile, FileEntry, WatchedFolder, display_name_for};
use crate::watch::{FolderWatcher, WatcherConfig};

/// Runtime configuration for [`WatchSupervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub watcher: WatcherConfig,
    pub sweeper: SweeperConfig,
    /// Watch list location. `None` uses [`WatchListStore::default_path`].
    pub watch_list_path: Option<PathBuf>,
    /// Folder seeded into an empty watch list. `None` uses the platform
    /// downloads directory.
    pub default_folder: Option<PathBuf>,
    /// Broadcast buffer per subscriber.
    pub event_capacity: usize,
    pub expiring_list_limit: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watcher: WatcherConfig::default(),
            sweeper: SweeperConfig::default(),
            watch_list_path: None,
            default_folder: None,
            event_capacity: 256,
            expiring_list_limit: DEFAULT_EXPIRING_LIMIT,
        }
    }
}

/// Owns the watch list, one [`FolderWatcher`] per folder and the
/// [`ExpirationSweeper`]. All mutation of watch state goes through `&mut self`.
pub struct WatchSupervisor {
    config: SupervisorConfig,
    store: Arc<MetadataStore>,
    watch_list: WatchListStore,
    folders: watch::Sender<Vec<WatchedFolder>>,
    watchers: HashMap<PathBuf, FolderWatcher>,
    sweeper: ExpirationSweeper,
    publisher: EventPublisher,
    bus: EventBus,
    shutdown_token: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
}

impl WatchSupervisor {
    /// Load the watch list (seeding the default folder when it is empty),
    /// start a watcher per folder and schedule periodic sweeps.
    pub async fn start(config: SupervisorConfig, store: Arc<MetadataStore>) -> Result<Self> {
        let watch_list = config
            .watch_list_path
            .clone()
            .map(WatchListStore::new)
            .unwrap_or_default();

        let loader = watch_list.clone();
        let loaded = spawn_blocking(move || loader.load()).await?;
        let folders = match loaded {
            Some(folders) if !folders.is_empty() => dedupe(folders),
            _ => {
                let seeded = seed_default(config.default_folder.as_deref());
                if !seeded.is_empty() {
                    let writer = watch_list.clone();
                    let to_save = seeded.clone();
                    if let Err(err) = spawn_blocking(move || writer.save(&to_save)).await? {
                        warn!(error = %err, "failed to persist seeded watch list");
                    }
                }
                seeded
            }
        };

        let (publisher, rx) = EventPublisher::channel();
        let bus = EventBus::new(config.event_capacity);
        let (folders_tx, folders_rx) = watch::channel(folders.clone());
        let shutdown_token = CancellationToken::new();

        let dispatcher = spawn_dispatcher(
            rx,
            bus.clone(),
            Arc::clone(&store),
            folders_rx.clone(),
            shutdown_token.clone(),
        );

        let mut watchers = HashMap::with_capacity(folders.len());
        for folder in &folders {
            let watcher = FolderWatcher::spawn(
                folder.path.clone(),
                Arc::clone(&store),
                config.watcher.clone(),
                publisher.clone(),
            )
            .await?;
            watchers.insert(folder.path.clone(), watcher);
        }

        let mut sweeper = ExpirationSweeper::new(
            config.sweeper.clone(),
            Arc::clone(&store),
            folders_rx,
            publisher.clone(),
        );
        sweeper.start_periodic();

        info!(
            folders = folders.len(),
            watch_list = %watch_list.path().display(),
            metadata_mode = ?store.mode(),
            "watch supervisor started"
        );

        Ok(Self {
            config,
            store,
            watch_list,
            folders: folders_tx,
            watchers,
            sweeper,
            publisher,
            bus,
            shutdown_token,
            dispatcher: Some(dispatcher),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn sweeper(&self) -> &ExpirationSweeper {
        &self.sweeper
    }

    /// Receive every event the watchers and the sweeper publish.
    pub fn subscribe(&self) -> broadcast::Receiver<ExpiryEvent> {
        self.bus.subscribe()
    }

    pub fn list_folders(&self) -> Vec<WatchedFolder> {
        self.folders.borrow().clone()
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.folders.borrow().iter().any(|folder| folder.path == path)
    }

    /// Add `path` to the watch list and start watching it. Relative paths
    /// resolve against the current directory.
    pub async fn add_folder(&mut self, path: impl AsRef<Path>) -> Result<WatchedFolder> {
        let path = std::path::absolute(path.as_ref())?;
        if self.is_watching(&path) {
            return Err(ExpiryError::AlreadyWatched(path));
        }

        let folder = WatchedFolder::new(path.clone());
        let mut next = self.list_folders();
        next.push(folder.clone());
        self.persist(next.clone()).await?;
        self.folders.send_replace(next);

        let watcher = FolderWatcher::spawn(
            path.clone(),
            Arc::clone(&self.store),
            self.config.watcher.clone(),
            self.publisher.clone(),
        )
        .await?;
        self.watchers.insert(path, watcher);

        info!(folder = %folder.path.display(), name = %folder.display_name, "folder added");
        self.publisher.publish(ExpiryEvent::WatchListChanged);
        Ok(folder)
    }

    /// Stop watching `path`. Returns `false` when it was not on the list.
    pub async fn remove_folder(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = std::path::absolute(path.as_ref())?;
        let current = self.list_folders();
        let next: Vec<WatchedFolder> = current
            .iter()
            .filter(|folder| folder.path != path)
            .cloned()
            .collect();
        if next.len() == current.len() {
            return Ok(false);
        }

        self.persist(next.clone()).await?;
        self.folders.send_replace(next);
        if let Some(mut watcher) = self.watchers.remove(&path) {
            watcher.stop();
        }

        info!(folder = %path.display(), "folder removed");
        self.publisher.publish(ExpiryEvent::WatchListChanged);
        Ok(true)
    }

    async fn persist(&self, folders: Vec<WatchedFolder>) -> Result<()> {
        let writer = self.watch_list.clone();
        spawn_blocking(move || writer.save(&folders)).await?
    }

    pub async fn set_expiration(&self, file: &Path, instant: DateTime<Utc>) -> Result<()> {
        let store = Arc::clone(&self.store);
        let file = file.to_path_buf();
        spawn_blocking(move || store.set(&file, instant)).await??;
        Ok(())
    }

    /// Apply a preset relative to now and return the resulting instant.
    pub async fn set_expiration_preset(
        &self,
        file: &Path,
        preset: ExpirationPreset,
    ) -> Result<DateTime<Utc>> {
        let instant = preset.expires_at(Utc::now());
        self.set_expiration(file, instant).await?;
        Ok(instant)
    }

    pub async fn remove_expiration(&self, file: &Path) -> Result<()> {
        let store = Arc::clone(&self.store);
        let file = file.to_path_buf();
        spawn_blocking(move || store.remove(&file)).await?
    }

    pub async fn expiration_of(&self, file: &Path) -> Result<Option<DateTime<Utc>>> {
        let store = Arc::clone(&self.store);
        let file = file.to_path_buf();
        Ok(spawn_blocking(move || store.get(&file)).await?)
    }

    /// Visible regular files in `folder`, sorted by name.
    pub async fn list_files_in_folder(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let folder = folder.to_path_buf();
        Ok(spawn_blocking(move || list_regular_files(&folder, HiddenFiles::Skip)).await??)
    }

    /// Visible regular files with their expiration. Files with a record come
    /// first, soonest first; the rest follow by name.
    pub async fn list_file_entries(&self, folder: &Path) -> Result<Vec<FileEntry>> {
        let folder = folder.to_path_buf();
        let store = Arc::clone(&self.store);
        let entries = spawn_blocking(move || -> std::io::Result<Vec<FileEntry>> {
            let mut entries: Vec<FileEntry> = list_regular_files(&folder, HiddenFiles::Skip)?
                .into_iter()
                .map(|path| FileEntry {
                    file_name: display_name_for(&path),
                    expiration: store.get(&path),
                    path,
                })
                .collect();
            entries.sort_by(|a, b| match (a.expiration, b.expiration) {
                (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.file_name.cmp(&b.file_name)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.file_name.cmp(&b.file_name),
            });
            Ok(entries)
        })
        .await??;
        Ok(entries)
    }

    /// Soonest-expiring files of `folder` from the latest sweep. `None` uses
    /// the configured limit.
    pub fn get_expiring_files(&self, folder: &Path, limit: Option<usize>) -> Vec<ExpiringFile> {
        self.sweeper
            .expiring_in_folder(folder, limit.unwrap_or(self.config.expiring_list_limit))
    }

    /// Sweep now instead of waiting for the timer.
    pub async fn run_sweep(&self) -> Result<Arc<Vec<ExpiringFile>>> {
        self.sweeper.run_once().await
    }

    /// Ask the folder's watcher to reconcile immediately. `false` when the
    /// folder is unknown or its watcher is not running.
    pub fn rescan_folder(&self, path: &Path) -> bool {
        self.watchers
            .get(path)
            .map(FolderWatcher::request_reconcile)
            .unwrap_or(false)
    }

    /// Stop every watcher, the sweep timer and the dispatch loop.
    pub async fn shutdown(mut self) {
        self.stop_all();
        if let Some(dispatcher) = self.dispatcher.take()
            && let Err(err) = dispatcher.await
        {
            warn!(error = %err, "event dispatcher ended abnormally");
        }
        info!("watch supervisor stopped");
    }

    fn stop_all(&mut self) {
        for watcher in self.watchers.values_mut() {
            watcher.stop();
        }
        self.sweeper.stop_periodic();
        self.shutdown_token.cancel();
    }
}

impl Drop for WatchSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl fmt::Debug for WatchSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSupervisor")
            .field("config", &self.config)
            .field("watch_list", &self.watch_list)
            .field("folders", &self.folders.borrow().len())
            .field("watchers", &self.watchers.len())
            .field("sweeper", &self.sweeper)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

fn dedupe(folders: Vec<WatchedFolder>) -> Vec<WatchedFolder> {
    let mut unique: Vec<WatchedFolder> = Vec::with_capacity(folders.len());
    for folder in folders {
        if unique.iter().any(|kept| kept.path == folder.path) {
            warn!(folder = %folder.path.display(), "dropping duplicate watch list entry");
            continue;
        }
        unique.push(folder);
    }
    unique
}

fn seed_default(configured: Option<&Path>) -> Vec<WatchedFolder> {
    let candidate = match configured {
        Some(path) => std::path::absolute(path).ok(),
        None => downloads_dir(dirs::download_dir(), dirs::home_dir()),
    };
    match candidate {
        Some(path) => {
            info!(folder = %path.display(), "watch list empty, seeding default folder");
            vec![WatchedFolder::new(path)]
        }
        None => {
            warn!("watch list empty and no default folder available");
            Vec::new()
        }
    }
}

/// The platform downloads directory. On Linux `dirs` only knows it from
/// `user-dirs.dirs`, so hosts without that file get `~/Downloads`.
fn downloads_dir(platform: Option<PathBuf>, home: Option<PathBuf>) -> Option<PathBuf> {
    platform.or_else(|| home.map(|home| home.join("Downloads")))
}

/// Single consumer of everything watchers and the sweeper publish.
/// Events about folders that have left the watch list are dropped, and new
/// files that gained a record while queued are filtered out.
fn spawn_dispatcher(
    mut rx: mpsc::UnboundedReceiver<ExpiryEvent>,
    bus: EventBus,
    store: Arc<MetadataStore>,
    folders: watch::Receiver<Vec<WatchedFolder>>,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown_token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Some(folder) = event.folder_path() {
                let watched = folders.borrow().iter().any(|entry| entry.path == folder);
                if !watched {
                    debug!(folder = %folder.display(), "dropping event for unwatched folder");
                    continue;
                }
            }

            let event = match event {
                ExpiryEvent::NewFilesDetected { folder_path, files } => {
                    let store = Arc::clone(&store);
                    let pending = spawn_blocking(move || {
                        files
                            .into_iter()
                            .filter(|file| !store.has(file))
                            .collect::<Vec<_>>()
                    })
                    .await;
                    match pending {
                        Ok(files) if files.is_empty() => continue,
                        Ok(files) => ExpiryEvent::NewFilesDetected { folder_path, files },
                        Err(err) => {
                            warn!(error = %err, "new file re-check failed");
                            continue;
                        }
                    }
                }
                other => other,
            };

            bus.emit(event);
        }
        debug!("event dispatcher stopped");
    })
}
