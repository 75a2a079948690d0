//! Per-folder new-file detection.
//!
//! A [`FolderWatcher`] owns one directory observer and one worker task. The
//! observer turns filesystem activity (or a timer) into triggers; the worker
//! debounces change triggers, then reconciles the folder's current contents
//! against the snapshot taken at the previous reconciliation and publishes
//! [`ExpiryEvent::NewFilesDetected`] for files without an expiration record.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::{EventPublisher, ExpiryEvent};
use crate::fs::{HiddenFiles, list_regular_files};
use crate::metadata::MetadataStore;

pub mod observer;

pub use observer::{
    DirectoryObserver, NativeObserver, PollingObserver, Trigger, WatchStrategy, attach_observer,
    select_observer,
};

const TRIGGER_QUEUE: usize = 64;

/// Knobs for a single folder watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub strategy: WatchStrategy,
    /// Quiet period after a change notification before reconciling. Absorbs
    /// multi-step writes such as a download landing as a temp file and then
    /// being renamed.
    pub debounce_window: Duration,
    /// Tick period when polling.
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            strategy: WatchStrategy::Auto,
            debounce_window: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// The known-path snapshot of one folder and the step that advances it.
pub struct Reconciler {
    folder: PathBuf,
    known: HashSet<PathBuf>,
    store: Arc<MetadataStore>,
}

impl Reconciler {
    /// Snapshot the folder's current visible regular files. An unreadable
    /// folder starts with an empty snapshot.
    pub fn new(folder: PathBuf, store: Arc<MetadataStore>) -> Self {
        let known = match list_regular_files(&folder, HiddenFiles::Skip) {
            Ok(files) => files.into_iter().collect(),
            Err(err) => {
                warn!(folder = %folder.display(), error = %err, "initial snapshot failed");
                HashSet::new()
            }
        };
        Self::with_snapshot(folder, known, store)
    }

    pub fn with_snapshot(
        folder: PathBuf,
        known: HashSet<PathBuf>,
        store: Arc<MetadataStore>,
    ) -> Self {
        Self {
            folder,
            known,
            store,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn known(&self) -> &HashSet<PathBuf> {
        &self.known
    }

    /// One reconciliation pass. Returns the event to publish, if any. The
    /// snapshot is replaced with the current listing whether or not anything
    /// new was found; a failed listing leaves it untouched.
    pub fn reconcile(&mut self) -> Option<ExpiryEvent> {
        let current = match list_regular_files(&self.folder, HiddenFiles::Skip) {
            Ok(files) => files,
            Err(err) => {
                warn!(
                    target: "expiry::watch",
                    folder = %self.folder.display(),
                    error = %err,
                    "reconciliation skipped, folder unreadable"
                );
                return None;
            }
        };

        // `current` is sorted, so the detected list keeps that order.
        let fresh: Vec<PathBuf> = current
            .iter()
            .filter(|path| !self.known.contains(*path))
            .filter(|path| !self.store.has(path))
            .cloned()
            .collect();

        self.known = current.into_iter().collect();

        if fresh.is_empty() {
            return None;
        }

        debug!(
            target: "expiry::watch",
            folder = %self.folder.display(),
            count = fresh.len(),
            "new files detected"
        );
        Some(ExpiryEvent::NewFilesDetected {
            folder_path: self.folder.clone(),
            files: fresh,
        })
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("folder", &self.folder)
            .field("known", &self.known.len())
            .finish()
    }
}

enum WatcherState {
    Idle(Reconciler),
    Running(RunningWatch),
    /// Observation could not be set up; the folder stays registered.
    Degraded(String),
    Stopped,
}

struct RunningWatch {
    observer: Box<dyn DirectoryObserver>,
    triggers: mpsc::Sender<Trigger>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

/// Watches one folder for newly arrived files.
pub struct FolderWatcher {
    folder: PathBuf,
    config: WatcherConfig,
    publisher: EventPublisher,
    state: WatcherState,
}

impl FolderWatcher {
    /// Build a watcher and take the initial snapshot. This lists the
    /// directory, so call it off the async executor (see [`Self::spawn`]).
    pub fn new(
        folder: PathBuf,
        store: Arc<MetadataStore>,
        config: WatcherConfig,
        publisher: EventPublisher,
    ) -> Self {
        let reconciler = Reconciler::new(folder.clone(), store);
        Self {
            folder,
            config,
            publisher,
            state: WatcherState::Idle(reconciler),
        }
    }

    /// Snapshot on the blocking pool, then start observing.
    pub async fn spawn(
        folder: PathBuf,
        store: Arc<MetadataStore>,
        config: WatcherConfig,
        publisher: EventPublisher,
    ) -> Result<Self> {
        let mut watcher =
            spawn_blocking(move || FolderWatcher::new(folder, store, config, publisher)).await?;
        watcher.start();
        Ok(watcher)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, WatcherState::Running(_))
    }

    /// Reason the watcher is inert, if setup failed.
    pub fn degraded_reason(&self) -> Option<&str> {
        match &self.state {
            WatcherState::Degraded(reason) => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Begin observing. Must be called inside a Tokio runtime. Calling it
    /// again, or after [`Self::stop`], does nothing.
    pub fn start(&mut self) {
        let state = std::mem::replace(&mut self.state, WatcherState::Stopped);
        let WatcherState::Idle(reconciler) = state else {
            self.state = state;
            return;
        };

        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
        let observer = attach_observer(
            self.config.strategy,
            self.config.poll_interval,
            tx.clone(),
            &self.folder,
        );

        let observer = match observer {
            Ok(observer) => observer,
            Err(err) => {
                let reason = err.to_string();
                warn!(
                    folder = %self.folder.display(),
                    error = %reason,
                    "folder watcher could not start, folder will not be observed"
                );
                self.publisher.publish(ExpiryEvent::WatcherDegraded {
                    folder_path: self.folder.clone(),
                    reason: reason.clone(),
                });
                self.state = WatcherState::Degraded(reason);
                return;
            }
        };

        info!(
            folder = %self.folder.display(),
            observer = observer.name(),
            "started watching folder"
        );

        let cancel = CancellationToken::new();
        let worker = spawn_worker(
            reconciler,
            rx,
            cancel.clone(),
            self.config.debounce_window,
            self.publisher.clone(),
        );

        self.state = WatcherState::Running(RunningWatch {
            observer,
            triggers: tx,
            cancel,
            worker,
        });
    }

    /// Stop observing. Idempotent. A reconciliation already under way is
    /// allowed to finish and may still publish.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, WatcherState::Stopped) {
            WatcherState::Running(mut running) => {
                running.observer.stop();
                running.cancel.cancel();
                info!(folder = %self.folder.display(), "stopped watching folder");
            }
            WatcherState::Idle(_) | WatcherState::Degraded(_) | WatcherState::Stopped => {}
        }
    }

    /// Ask for a reconciliation outside the normal trigger flow. Returns
    /// false when the watcher is not running.
    pub fn request_reconcile(&self) -> bool {
        match &self.state {
            WatcherState::Running(running) => {
                // A full queue means one is already pending.
                let _ = running.triggers.try_send(Trigger::Manual);
                true
            }
            _ => false,
        }
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for FolderWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            WatcherState::Idle(_) => "idle",
            WatcherState::Running(running) if running.worker.is_finished() => "finished",
            WatcherState::Running(_) => "running",
            WatcherState::Degraded(_) => "degraded",
            WatcherState::Stopped => "stopped",
        };
        f.debug_struct("FolderWatcher")
            .field("folder", &self.folder)
            .field("config", &self.config)
            .field("state", &state)
            .finish()
    }
}

fn spawn_worker(
    mut reconciler: Reconciler,
    mut rx: mpsc::Receiver<Trigger>,
    cancel: CancellationToken,
    debounce: Duration,
    publisher: EventPublisher,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let trigger = tokio::select! {
                _ = cancel.cancelled() => break,
                trigger = rx.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            if trigger == Trigger::Change {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(debounce) => {}
                }
            }
            // Everything queued during the window is covered by this pass.
            while rx.try_recv().is_ok() {}

            let pass = spawn_blocking(move || {
                let event = reconciler.reconcile();
                (reconciler, event)
            })
            .await;

            match pass {
                Ok((returned, event)) => {
                    reconciler = returned;
                    if let Some(event) = event {
                        publisher.publish(event);
                    }
                }
                Err(join_err) => {
                    error!(error = %join_err, "reconciliation task failed, watcher exiting");
                    break;
                }
            }
        }
    })
}
