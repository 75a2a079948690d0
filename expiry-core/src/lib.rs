//! # Expiry Core
//!
//! Engine for tracking user-assigned expiration dates on files in watched
//! folders.
//!
//! ## Overview
//!
//! - **Metadata**: [`MetadataStore`] keeps one expiration instant per file,
//!   on the file itself as an extended attribute or in a sidecar record.
//! - **Watching**: [`FolderWatcher`] notices newly arrived files in one folder
//!   and reports the ones that still need a decision.
//! - **Sweeping**: [`ExpirationSweeper`] periodically classifies every tracked
//!   file as expired, expiring soon or fine.
//! - **Supervision**: [`WatchSupervisor`] owns the persisted watch list, the
//!   watchers and the sweeper, and fans their [`ExpiryEvent`]s out to
//!   subscribers.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use expiry_core::{MetadataMode, MetadataStore, SupervisorConfig, WatchSupervisor};
//!
//! # async fn run() -> expiry_core::Result<()> {
//! let store = Arc::new(MetadataStore::new(MetadataMode::Auto));
//! let supervisor = WatchSupervisor::start(SupervisorConfig::default(), store).await?;
//! let mut events = supervisor.subscribe();
//! while let Ok(event) = events.recv().await {
//!     for note in event.notifications() {
//!         println!("{}: {}", note.title, note.body);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod fs;
pub mod metadata;
pub mod notifier;
pub mod settings;
pub mod supervisor;
pub mod sweep;
pub mod types;
pub mod watch;

pub use error::{ExpiryError, Result};
pub use events::{EventBus, EventPublisher, ExpiryEvent, Notification};
pub use metadata::{MetadataMode, MetadataStore};
pub use notifier::{Notifier, TracingNotifier};
pub use settings::WatchListStore;
pub use supervisor::{SupervisorConfig, WatchSupervisor};
pub use sweep::{DEFAULT_EXPIRING_LIMIT, ExpirationSweeper, SweeperConfig};
pub use types::{
    ExpirationPreset, ExpirationStatus, ExpiringFile, FileEntry, FolderId, WatchedFolder,
    classify, remaining_label,
};
pub use watch::{FolderWatcher, Reconciler, WatchStrategy, WatcherConfig};
