//! Persisted watch list.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{ExpiryError, Result};
use crate::types::WatchedFolder;

/// On-disk form of one watched folder. Ids are not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedFolder {
    path: PathBuf,
    display_name: String,
}

/// Reads and writes the ordered watch list as a JSON array.
#[derive(Debug, Clone)]
pub struct WatchListStore {
    path: PathBuf,
}

impl WatchListStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/expiry/watched_folders.json`, or a relative file in the
    /// working directory when the platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("expiry"))
            .unwrap_or_else(|| PathBuf::from(".expiry"))
            .join("watched_folders.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored list, or `None` when the file is missing or unreadable.
    /// Callers treat `None` like an empty list.
    pub fn load(&self) -> Option<Vec<WatchedFolder>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved watch list");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read watch list");
                return None;
            }
        };

        match serde_json::from_str::<Vec<PersistedFolder>>(&raw) {
            Ok(entries) => Some(
                entries
                    .into_iter()
                    .map(|entry| WatchedFolder::with_name(entry.path, entry.display_name))
                    .collect(),
            ),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring corrupt watch list");
                None
            }
        }
    }

    /// Replace the stored list. The file is written to a temporary sibling
    /// and renamed into place.
    pub fn save(&self, folders: &[WatchedFolder]) -> Result<()> {
        let entries: Vec<PersistedFolder> = folders
            .iter()
            .map(|folder| PersistedFolder {
                path: folder.path.clone(),
                display_name: folder.display_name.clone(),
            })
            .collect();
        let json = serde_json::to_vec_pretty(&entries)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|err| ExpiryError::Io(err.error))?;

        debug!(path = %self.path.display(), count = folders.len(), "watch list saved");
        Ok(())
    }
}

impl Default for WatchListStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}
