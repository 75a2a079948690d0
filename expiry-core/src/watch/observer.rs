//! Directory observers: the sources of reconciliation triggers.
//!
//! Two implementations sit behind [`DirectoryObserver`]. The native one wraps
//! `notify`'s recommended platform watcher; the polling one ticks on a fixed
//! interval for platforms (or mounts) where native notification is missing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{AccessKind, AccessMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::error::{ExpiryError, Result};

/// Why a reconciliation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Raw change notification; debounced before acting.
    Change,
    /// Polling tick; acted on immediately.
    Tick,
    /// Explicit request from the owner.
    Manual,
}

/// Which observer a watcher should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStrategy {
    /// Native notification when the platform watcher can be created,
    /// polling otherwise.
    #[default]
    Auto,
    Native,
    Polling,
}

/// A source of [`Trigger`]s for one directory.
pub trait DirectoryObserver: Send {
    /// Begin observing `folder`.
    fn observe(&mut self, folder: &Path) -> Result<()>;

    /// Stop producing triggers. Safe to call repeatedly.
    fn stop(&mut self);

    fn name(&self) -> &'static str;
}

/// Pick an observer for `strategy`. `Auto` tries the native watcher and
/// falls back to polling when it cannot be constructed.
pub fn select_observer(
    strategy: WatchStrategy,
    poll_interval: Duration,
    triggers: mpsc::Sender<Trigger>,
) -> Result<Box<dyn DirectoryObserver>> {
    match strategy {
        WatchStrategy::Polling => Ok(Box::new(PollingObserver::new(poll_interval, triggers))),
        WatchStrategy::Native => Ok(Box::new(NativeObserver::new(triggers)?)),
        WatchStrategy::Auto => match NativeObserver::new(triggers.clone()) {
            Ok(native) => Ok(Box::new(native)),
            Err(err) => {
                info!(error = %err, "native change notification unavailable, polling instead");
                Ok(Box::new(PollingObserver::new(poll_interval, triggers)))
            }
        },
    }
}

/// Select an observer and attach it to `folder`. Under `Auto`, a native
/// watcher that cannot take the folder (an exhausted inotify watch limit, a
/// network mount) is swapped for polling.
pub fn attach_observer(
    strategy: WatchStrategy,
    poll_interval: Duration,
    triggers: mpsc::Sender<Trigger>,
    folder: &Path,
) -> Result<Box<dyn DirectoryObserver>> {
    let observer = select_observer(strategy, poll_interval, triggers.clone())?;
    let fallback = strategy == WatchStrategy::Auto;
    observe_or_poll(observer, fallback, poll_interval, triggers, folder)
}

fn observe_or_poll(
    mut observer: Box<dyn DirectoryObserver>,
    fallback: bool,
    poll_interval: Duration,
    triggers: mpsc::Sender<Trigger>,
    folder: &Path,
) -> Result<Box<dyn DirectoryObserver>> {
    let err = match observer.observe(folder) {
        Ok(()) => return Ok(observer),
        Err(err) => err,
    };
    observer.stop();
    if !fallback || observer.name() == "polling" {
        return Err(err);
    }

    info!(
        folder = %folder.display(),
        error = %err,
        "{} observer could not watch folder, polling instead",
        observer.name()
    );
    let mut polling = PollingObserver::new(poll_interval, triggers);
    polling.observe(folder)?;
    Ok(Box::new(polling))
}

/// `notify`-backed observer watching a single directory non-recursively.
pub struct NativeObserver {
    watcher: Option<RecommendedWatcher>,
    folder: Option<PathBuf>,
}

impl NativeObserver {
    pub fn new(triggers: mpsc::Sender<Trigger>) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if is_relevant(&event.kind) {
                        // A full queue already holds a pending trigger.
                        let _ = triggers.try_send(Trigger::Change);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "watch backend reported an error");
                    let _ = triggers.try_send(Trigger::Change);
                }
            },
            NotifyConfig::default(),
        )?;

        Ok(Self {
            watcher: Some(watcher),
            folder: None,
        })
    }
}

impl DirectoryObserver for NativeObserver {
    fn observe(&mut self, folder: &Path) -> Result<()> {
        let watcher = self
            .watcher
            .as_mut()
            .ok_or_else(|| ExpiryError::Internal("observer already stopped".into()))?;
        watcher.watch(folder, RecursiveMode::NonRecursive)?;
        self.folder = Some(folder.to_path_buf());
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Some(folder) = self.folder.take()
                && let Err(err) = watcher.unwatch(&folder)
            {
                debug!(folder = %folder.display(), error = %err, "unwatch failed");
            }
            // Dropping the watcher ends the notify stream.
        }
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

impl fmt::Debug for NativeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObserver")
            .field("folder", &self.folder)
            .field("active", &self.watcher.is_some())
            .finish()
    }
}

/// Reading access events would feed back into our own directory scans, so
/// only mutations (and finished writes) count.
fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

/// Fixed-interval ticker for folders without native notification.
pub struct PollingObserver {
    interval: Duration,
    triggers: mpsc::Sender<Trigger>,
    task: Option<JoinHandle<()>>,
}

impl PollingObserver {
    pub fn new(interval: Duration, triggers: mpsc::Sender<Trigger>) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            triggers,
            task: None,
        }
    }
}

impl DirectoryObserver for PollingObserver {
    fn observe(&mut self, folder: &Path) -> Result<()> {
        if !folder.is_dir() {
            return Err(ExpiryError::NotADirectory(folder.to_path_buf()));
        }
        if self.task.is_some() {
            return Ok(());
        }

        let period = self.interval;
        let triggers = self.triggers.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; the snapshot is already fresh.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if triggers.is_closed() {
                    break;
                }
                let _ = triggers.try_send(Trigger::Tick);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn name(&self) -> &'static str {
        "polling"
    }
}

impl fmt::Debug for PollingObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingObserver")
            .field("interval", &self.interval)
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl Drop for PollingObserver {
    fn drop(&mut self) {
        self.stop();
    }
}
