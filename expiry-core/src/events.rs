//! Outbound events and the channels that carry them.
//!
//! Watchers and the sweeper publish into an unbounded mpsc queue owned by the
//! supervisor. The supervisor's dispatch loop is the single consumer and fans
//! events out to subscribers over a broadcast channel.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::types::{display_name_for, remaining_label};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryEvent {
    /// Files appeared in a watched folder and have no expiration yet.
    NewFilesDetected {
        folder_path: PathBuf,
        files: Vec<PathBuf>,
    },
    FileExpiringSoon {
        file_path: PathBuf,
        folder_path: PathBuf,
        expiration: DateTime<Utc>,
        time_remaining: ChronoDuration,
    },
    FileExpired {
        file_path: PathBuf,
        folder_path: PathBuf,
        expiration: DateTime<Utc>,
    },
    /// A folder was added to or removed from the watch list.
    WatchListChanged,
    /// The folder stays on the watch list but nothing observes it until the
    /// next restart.
    WatcherDegraded { folder_path: PathBuf, reason: String },
}

/// User-facing text for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub file_path: Option<PathBuf>,
}

impl ExpiryEvent {
    /// Watched folder the event concerns, if it concerns one.
    pub fn folder_path(&self) -> Option<&Path> {
        match self {
            ExpiryEvent::NewFilesDetected { folder_path, .. }
            | ExpiryEvent::FileExpiringSoon { folder_path, .. }
            | ExpiryEvent::FileExpired { folder_path, .. }
            | ExpiryEvent::WatcherDegraded { folder_path, .. } => Some(folder_path.as_path()),
            ExpiryEvent::WatchListChanged => None,
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        match self {
            ExpiryEvent::NewFilesDetected { files, .. } => files
                .iter()
                .map(|file| Notification {
                    title: "New File Detected".to_string(),
                    body: format!(
                        "A new file '{}' was detected. Set an expiration date?",
                        display_name_for(file)
                    ),
                    file_path: Some(file.clone()),
                })
                .collect(),
            ExpiryEvent::FileExpiringSoon {
                file_path,
                time_remaining,
                ..
            } => vec![Notification {
                title: "File Expiring Soon".to_string(),
                body: format!(
                    "'{}' will expire soon ({}).",
                    display_name_for(file_path),
                    remaining_label(*time_remaining)
                ),
                file_path: Some(file_path.clone()),
            }],
            ExpiryEvent::FileExpired { file_path, .. } => vec![Notification {
                title: "File Expired".to_string(),
                body: format!(
                    "'{}' has expired and should be deleted.",
                    display_name_for(file_path)
                ),
                file_path: Some(file_path.clone()),
            }],
            ExpiryEvent::WatcherDegraded {
                folder_path,
                reason,
            } => vec![Notification {
                title: "Folder Not Watched".to_string(),
                body: format!(
                    "'{}' could not be watched: {}",
                    display_name_for(folder_path),
                    reason
                ),
                file_path: None,
            }],
            ExpiryEvent::WatchListChanged => Vec::new(),
        }
    }
}

/// Producer side handed to watchers and the sweeper.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<ExpiryEvent>,
}

impl EventPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExpiryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: ExpiryEvent) {
        if self.tx.send(event).is_err() {
            debug!("event dropped, dispatcher is gone");
        }
    }
}

/// In-process fan-out to presentation layers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExpiryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExpiryEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers. Having none is not an error.
    pub fn emit(&self, event: ExpiryEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_files_render_one_notification_each() {
        let event = ExpiryEvent::NewFilesDetected {
            folder_path: PathBuf::from("/dl"),
            files: vec![PathBuf::from("/dl/a.zip"), PathBuf::from("/dl/b.pdf")],
        };
        let notes = event.notifications();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].title, "New File Detected");
        assert_eq!(
            notes[1].body,
            "A new file 'b.pdf' was detected. Set an expiration date?"
        );
    }

    #[test]
    fn expired_and_soon_bodies() {
        let expired = ExpiryEvent::FileExpired {
            file_path: PathBuf::from("/dl/x.txt"),
            folder_path: PathBuf::from("/dl"),
            expiration: Utc::now(),
        };
        assert_eq!(
            expired.notifications()[0].body,
            "'x.txt' has expired and should be deleted."
        );

        let soon = ExpiryEvent::FileExpiringSoon {
            file_path: PathBuf::from("/dl/y.txt"),
            folder_path: PathBuf::from("/dl"),
            expiration: Utc::now(),
            time_remaining: ChronoDuration::minutes(30),
        };
        assert_eq!(
            soon.notifications()[0].body,
            "'y.txt' will expire soon (30m remaining)."
        );
        assert!(ExpiryEvent::WatchListChanged.notifications().is_empty());
    }

    #[tokio::test]
    async fn bus_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.emit(ExpiryEvent::WatchListChanged);

        let mut rx = bus.subscribe();
        bus.emit(ExpiryEvent::WatchListChanged);
        assert_eq!(rx.recv().await.unwrap(), ExpiryEvent::WatchListChanged);
    }
}
