//! Domain types shared by the watcher, sweeper and supervisor.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of a watched folder. Regenerated every time the watch
/// list is loaded; lookups go through the folder path instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(pub Uuid);

impl Default for FolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderId {
    pub fn new() -> Self {
        FolderId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A directory the supervisor monitors for new files and sweeps for
/// expirations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFolder {
    pub id: FolderId,
    pub path: PathBuf,
    pub display_name: String,
}

impl WatchedFolder {
    /// Build a folder entry named after the final path component.
    pub fn new(path: PathBuf) -> Self {
        let display_name = display_name_for(&path);
        Self {
            id: FolderId::new(),
            path,
            display_name,
        }
    }

    pub fn with_name(path: PathBuf, display_name: impl Into<String>) -> Self {
        Self {
            id: FolderId::new(),
            path,
            display_name: display_name.into(),
        }
    }
}

pub(crate) fn display_name_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Outcome of comparing an expiration instant against "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationStatus {
    Expired,
    ExpiringSoon,
    Ok,
}

/// Classify an instant. Expired takes priority over expiring-soon even though
/// an expired instant also satisfies the soon inequality.
pub fn classify(
    expiration: DateTime<Utc>,
    now: DateTime<Utc>,
    soon_threshold: ChronoDuration,
) -> ExpirationStatus {
    if expiration <= now {
        ExpirationStatus::Expired
    } else if expiration - now <= soon_threshold {
        ExpirationStatus::ExpiringSoon
    } else {
        ExpirationStatus::Ok
    }
}

/// A file with a recorded expiration, as seen by one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiringFile {
    pub file_path: PathBuf,
    pub folder_path: PathBuf,
    pub expiration: DateTime<Utc>,
    pub file_name: String,
}

impl ExpiringFile {
    pub fn new(file_path: PathBuf, folder_path: PathBuf, expiration: DateTime<Utc>) -> Self {
        let file_name = display_name_for(&file_path);
        Self {
            file_path,
            folder_path,
            expiration,
            file_name,
        }
    }

    /// Signed time until expiration; negative once expired.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> ChronoDuration {
        self.expiration - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }

    pub fn is_expiring_soon(&self, now: DateTime<Utc>, threshold: ChronoDuration) -> bool {
        self.time_remaining(now) <= threshold
    }

    pub fn status(&self, now: DateTime<Utc>, threshold: ChronoDuration) -> ExpirationStatus {
        classify(self.expiration, now, threshold)
    }

    pub fn time_remaining_label(&self, now: DateTime<Utc>) -> String {
        remaining_label(self.time_remaining(now))
    }
}

/// Human readable countdown: `"Expired"`, `"42m remaining"`,
/// `"3h 5m remaining"` or `"2 days remaining"`.
pub fn remaining_label(remaining: ChronoDuration) -> String {
    let secs = remaining.num_seconds();
    if secs <= 0 {
        "Expired".to_string()
    } else if secs < 3_600 {
        format!("{}m remaining", secs / 60)
    } else if secs < 86_400 {
        format!("{}h {}m remaining", secs / 3_600, (secs % 3_600) / 60)
    } else {
        format!("{} days remaining", secs / 86_400)
    }
}

/// Quick expiration choices offered to users when a new file shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationPreset {
    OneDay,
    OneWeek,
    OneMonth,
}

impl ExpirationPreset {
    pub fn expires_at(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ExpirationPreset::OneDay => now + ChronoDuration::days(1),
            ExpirationPreset::OneWeek => now + ChronoDuration::weeks(1),
            ExpirationPreset::OneMonth => now
                .checked_add_months(Months::new(1))
                .unwrap_or_else(|| now + ChronoDuration::days(30)),
        }
    }
}

/// One row of a folder listing: a regular file and its expiration, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub expiration: Option<DateTime<Utc>>,
}
