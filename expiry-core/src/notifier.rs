//! Delivery of user-facing notifications.

use crate::events::{ExpiryEvent, Notification};
use tracing::info;

/// Something that can put a [`Notification`] in front of a user.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);

    /// Render and deliver everything `event` produces.
    fn deliver(&self, event: &ExpiryEvent) {
        for notification in event.notifications() {
            self.notify(&notification);
        }
    }
}

/// Writes notifications to the log. Used by the headless daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        match &notification.file_path {
            Some(path) => info!(
                target: "expiry::notify",
                file = %path.display(),
                "{}: {}",
                notification.title,
                notification.body
            ),
            None => info!(
                target: "expiry::notify",
                "{}: {}",
                notification.title,
                notification.body
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl Notifier for Recording {
        fn notify(&self, notification: &Notification) {
            self.0.lock().unwrap().push(notification.title.clone());
        }
    }

    #[test]
    fn deliver_fans_out_per_file() {
        let notifier = Recording::default();
        notifier.deliver(&ExpiryEvent::NewFilesDetected {
            folder_path: PathBuf::from("/in"),
            files: vec![PathBuf::from("/in/a"), PathBuf::from("/in/b")],
        });
        notifier.deliver(&ExpiryEvent::WatchListChanged);

        assert_eq!(notifier.0.lock().unwrap().len(), 2);
    }
}
