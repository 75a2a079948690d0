//! Periodic expiration sweep across every watched folder.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventPublisher, ExpiryEvent};
use crate::fs::{HiddenFiles, list_regular_files};
use crate::metadata::MetadataStore;
use crate::types::{ExpirationStatus, ExpiringFile, WatchedFolder, classify};

/// Number of entries [`ExpirationSweeper::expiring_in_folder`] returns when
/// callers have no preference.
pub const DEFAULT_EXPIRING_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Delay before the first periodic sweep after start.
    pub initial_delay: Duration,
    /// Files expiring within this window are reported as expiring soon.
    pub expiring_soon_threshold: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            initial_delay: Duration::from_secs(5),
            expiring_soon_threshold: Duration::from_secs(60 * 60),
        }
    }
}

impl SweeperConfig {
    fn soon_threshold(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.expiring_soon_threshold)
            .unwrap_or_else(|_| ChronoDuration::hours(1))
    }
}

struct SweeperInner {
    config: SweeperConfig,
    store: Arc<MetadataStore>,
    folders: watch::Receiver<Vec<WatchedFolder>>,
    snapshot: watch::Sender<Arc<Vec<ExpiringFile>>>,
    publisher: EventPublisher,
    // Keeps concurrent sweeps from publishing snapshots out of order.
    run_lock: Mutex<()>,
}

impl SweeperInner {
    async fn run_once_at(&self, now: DateTime<Utc>) -> Result<Arc<Vec<ExpiringFile>>> {
        let _guard = self.run_lock.lock().await;

        let folders = self.folders.borrow().clone();
        let store = Arc::clone(&self.store);
        let folder_count = folders.len();
        let files = spawn_blocking(move || scan_folders(&store, &folders)).await?;
        let files = Arc::new(files);

        self.snapshot.send_replace(Arc::clone(&files));

        let threshold = self.config.soon_threshold();
        let mut expired = 0usize;
        let mut soon = 0usize;
        for file in files.iter() {
            match classify(file.expiration, now, threshold) {
                ExpirationStatus::Expired => {
                    expired += 1;
                    self.publisher.publish(ExpiryEvent::FileExpired {
                        file_path: file.file_path.clone(),
                        folder_path: file.folder_path.clone(),
                        expiration: file.expiration,
                    });
                }
                ExpirationStatus::ExpiringSoon => {
                    soon += 1;
                    self.publisher.publish(ExpiryEvent::FileExpiringSoon {
                        file_path: file.file_path.clone(),
                        folder_path: file.folder_path.clone(),
                        expiration: file.expiration,
                        time_remaining: file.time_remaining(now),
                    });
                }
                ExpirationStatus::Ok => {}
            }
        }

        info!(
            target: "expiry::sweep",
            folders = folder_count,
            tracked = files.len(),
            expired,
            expiring_soon = soon,
            "expiration sweep complete"
        );
        Ok(files)
    }
}

/// Files with a record, folder by folder in watch-list order, then by name.
fn scan_folders(store: &MetadataStore, folders: &[WatchedFolder]) -> Vec<ExpiringFile> {
    let mut found = Vec::new();
    for folder in folders {
        let files = match list_regular_files(&folder.path, HiddenFiles::Include) {
            Ok(files) => files,
            Err(err) => {
                warn!(
                    target: "expiry::sweep",
                    folder = %folder.path.display(),
                    error = %err,
                    "skipping unreadable folder"
                );
                continue;
            }
        };

        for file in files {
            if let Some(expiration) = store.get(&file) {
                found.push(ExpiringFile::new(file, folder.path.clone(), expiration));
            }
        }
    }
    found
}

/// Classifies every recorded file on a timer and publishes the results.
///
/// The latest result set is kept as a snapshot that is replaced wholesale on
/// every run; readers get a shared copy through [`Self::current`] or follow
/// updates through [`Self::subscribe`].
pub struct ExpirationSweeper {
    inner: Arc<SweeperInner>,
    periodic: Option<(CancellationToken, JoinHandle<()>)>,
}

impl ExpirationSweeper {
    pub fn new(
        config: SweeperConfig,
        store: Arc<MetadataStore>,
        folders: watch::Receiver<Vec<WatchedFolder>>,
        publisher: EventPublisher,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(SweeperInner {
                config,
                store,
                folders,
                snapshot,
                publisher,
                run_lock: Mutex::new(()),
            }),
            periodic: None,
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.inner.config
    }

    pub async fn run_once(&self) -> Result<Arc<Vec<ExpiringFile>>> {
        self.inner.run_once_at(Utc::now()).await
    }

    /// Sweep, classifying against `now` instead of the wall clock.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<Arc<Vec<ExpiringFile>>> {
        self.inner.run_once_at(now).await
    }

    pub fn current(&self) -> Arc<Vec<ExpiringFile>> {
        Arc::clone(&self.inner.snapshot.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ExpiringFile>>> {
        self.inner.snapshot.subscribe()
    }

    /// The `limit` soonest-expiring files of `folder` from the latest sweep.
    pub fn expiring_in_folder(&self, folder: &Path, limit: usize) -> Vec<ExpiringFile> {
        let mut files: Vec<ExpiringFile> = self
            .current()
            .iter()
            .filter(|file| file.folder_path == folder)
            .cloned()
            .collect();
        files.sort_by_key(|file| file.expiration);
        files.truncate(limit);
        files
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic.is_some()
    }

    /// Start the timer task. The first sweep runs after the initial delay,
    /// then once per interval. Does nothing if already running.
    pub fn start_periodic(&mut self) {
        if self.periodic.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(inner.config.initial_delay) => {}
            }

            let mut ticker = interval(inner.config.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // Outside the select so a stop never aborts a sweep midway.
                if let Err(err) = inner.run_once_at(Utc::now()).await {
                    warn!(target: "expiry::sweep", error = %err, "expiration sweep failed");
                }
            }
            debug!(target: "expiry::sweep", "periodic sweep stopped");
        });

        info!(
            interval = ?self.inner.config.interval,
            initial_delay = ?self.inner.config.initial_delay,
            "periodic expiration sweep scheduled"
        );
        self.periodic = Some((cancel, handle));
    }

    /// Cancel future sweeps. Idempotent.
    pub fn stop_periodic(&mut self) {
        if let Some((cancel, _handle)) = self.periodic.take() {
            cancel.cancel();
        }
    }
}

impl Drop for ExpirationSweeper {
    fn drop(&mut self) {
        self.stop_periodic();
    }
}

impl fmt::Debug for ExpirationSweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirationSweeper")
            .field("config", &self.inner.config)
            .field("snapshot_len", &self.inner.snapshot.borrow().len())
            .field("periodic", &self.periodic.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataMode;
    use std::fs;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: tempfile::TempDir,
        folder: WatchedFolder,
        store: Arc<MetadataStore>,
        sweeper: ExpirationSweeper,
        events: mpsc::UnboundedReceiver<ExpiryEvent>,
        _folders: watch::Sender<Vec<WatchedFolder>>,
    }

    fn fixture(config: SweeperConfig) -> Fixture {
        let dir = tempdir().unwrap();
        let folder = WatchedFolder::new(dir.path().to_path_buf());
        let store = Arc::new(MetadataStore::new(MetadataMode::Auto));
        let (folders_tx, folders_rx) = watch::channel(vec![folder.clone()]);
        let (publisher, events) = EventPublisher::channel();
        let sweeper = ExpirationSweeper::new(config, Arc::clone(&store), folders_rx, publisher);
        Fixture {
            _dir: dir,
            folder,
            store,
            sweeper,
            events,
            _folders: folders_tx,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ExpiryEvent>) -> Vec<ExpiryEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn classifies_and_emits_per_file() {
        let mut fx = fixture(SweeperConfig::default());
        let now = Utc::now();
        let base = fx.folder.path.clone();

        let expired = base.join("expired.txt");
        let soon = base.join("soon.txt");
        let later = base.join("later.txt");
        let untracked = base.join("untracked.txt");
        for path in [&expired, &soon, &later, &untracked] {
            fs::write(path, b"x").unwrap();
        }
        fx.store.set(&expired, now - ChronoDuration::seconds(1)).unwrap();
        fx.store.set(&soon, now + ChronoDuration::seconds(1_800)).unwrap();
        fx.store.set(&later, now + ChronoDuration::seconds(7_200)).unwrap();

        let files = fx.sweeper.run_once_at(now).await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(fx.sweeper.current().len(), 3);

        let events = drain(&mut fx.events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|event| matches!(
            event,
            ExpiryEvent::FileExpired { file_path, .. } if *file_path == expired
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            ExpiryEvent::FileExpiringSoon { file_path, time_remaining, .. }
                if *file_path == soon && time_remaining.num_seconds() > 1_700
        )));
    }

    #[tokio::test]
    async fn expired_files_are_reported_every_sweep() {
        let mut fx = fixture(SweeperConfig::default());
        let file = fx.folder.path.join("old.log");
        fs::write(&file, b"x").unwrap();
        fx.store
            .set(&file, Utc::now() - ChronoDuration::days(2))
            .unwrap();

        fx.sweeper.run_once().await.unwrap();
        fx.sweeper.run_once().await.unwrap();

        let expired = drain(&mut fx.events)
            .into_iter()
            .filter(|event| matches!(event, ExpiryEvent::FileExpired { .. }))
            .count();
        assert_eq!(expired, 2);
    }

    #[tokio::test]
    async fn hidden_files_are_swept() {
        let fx = fixture(SweeperConfig::default());
        let hidden = fx.folder.path.join(".secret");
        fs::write(&hidden, b"x").unwrap();
        fx.store
            .set(&hidden, Utc::now() + ChronoDuration::days(3))
            .unwrap();

        let files = fx.sweeper.run_once().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, ".secret");
    }

    #[tokio::test]
    async fn missing_folder_yields_nothing() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::new(MetadataMode::Auto));
        let ghost = WatchedFolder::new(dir.path().join("ghost"));
        let (_tx, rx) = watch::channel(vec![ghost]);
        let (publisher, _events) = EventPublisher::channel();
        let sweeper = ExpirationSweeper::new(SweeperConfig::default(), store, rx, publisher);

        assert!(sweeper.run_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expiring_in_folder_orders_by_date() {
        let fx = fixture(SweeperConfig::default());
        let now = Utc::now();
        for (name, days) in [("c", 3), ("a", 9), ("b", 1)] {
            let path = fx.folder.path.join(name);
            fs::write(&path, b"x").unwrap();
            fx.store.set(&path, now + ChronoDuration::days(days)).unwrap();
        }
        fx.sweeper.run_once_at(now).await.unwrap();

        let top = fx.sweeper.expiring_in_folder(&fx.folder.path, 2);
        let names: Vec<&str> = top.iter().map(|file| file.file_name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(
            fx.sweeper
                .expiring_in_folder(Path::new("/elsewhere"), 5)
                .is_empty()
        );
    }

    #[tokio::test]
    async fn periodic_sweeps_publish_snapshots() {
        let mut fx = fixture(SweeperConfig {
            interval: Duration::from_millis(30),
            initial_delay: Duration::from_millis(10),
            ..SweeperConfig::default()
        });
        let file = fx.folder.path.join("tracked.bin");
        fs::write(&file, b"x").unwrap();
        fx.store
            .set(&file, Utc::now() + ChronoDuration::days(1))
            .unwrap();

        let mut updates = fx.sweeper.subscribe();
        fx.sweeper.start_periodic();
        fx.sweeper.start_periodic();
        assert!(fx.sweeper.is_periodic());

        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updates.borrow().len(), 1);

        fx.sweeper.stop_periodic();
        fx.sweeper.stop_periodic();
        assert!(!fx.sweeper.is_periodic());
    }
}
