//! Durable per-file expiration records.
//!
//! Records are attached to the file itself through an extended attribute and
//! fall back to a sidecar file when the filesystem refuses attributes. There
//! is no in-memory cache: every call goes to disk, so the store can be shared
//! freely between the watchers, the sweeper and callers.

use std::io;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExpiryError, Result};

pub mod attribute;
pub mod sidecar;

use attribute::AttributeBackend;
use sidecar::SidecarBackend;

pub use attribute::EXPIRATION_ATTRIBUTE;
pub use sidecar::{SIDECAR_DIR, SIDECAR_SUFFIX, sidecar_path};

/// Raw string storage for one record per file.
pub(crate) trait RecordBackend {
    fn read(&self, path: &Path) -> io::Result<Option<String>>;
    fn write(&self, path: &Path, value: &str) -> io::Result<()>;
    fn clear(&self, path: &Path) -> io::Result<()>;
}

/// Which storage the store writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataMode {
    /// Extended attribute, sidecar when the filesystem lacks support.
    #[default]
    Auto,
    /// Extended attribute only.
    Xattr,
    /// Sidecar only.
    Sidecar,
}

/// File path -> expiration instant, persisted next to (or on) the file.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    mode: MetadataMode,
    attribute: AttributeBackend,
    sidecar: SidecarBackend,
}

impl MetadataStore {
    pub fn new(mode: MetadataMode) -> Self {
        Self {
            mode,
            attribute: AttributeBackend,
            sidecar: SidecarBackend,
        }
    }

    pub fn mode(&self) -> MetadataMode {
        self.mode
    }

    /// Record `instant` as the expiration of `path`, replacing any previous
    /// record.
    pub fn set(&self, path: &Path, instant: DateTime<Utc>) -> Result<()> {
        if !path.is_file() {
            return Err(ExpiryError::FileNotFound(path.to_path_buf()));
        }
        let value = format_instant(instant);

        match self.mode {
            MetadataMode::Xattr => self.attribute.write(path, &value)?,
            MetadataMode::Sidecar => self.sidecar.write(path, &value)?,
            MetadataMode::Auto => match self.attribute.write(path, &value) {
                Ok(()) => {
                    // A stale sidecar would otherwise shadow nothing but still
                    // count as a second record.
                    if let Err(err) = self.sidecar.clear(path) {
                        debug!(path = %path.display(), error = %err, "stale sidecar cleanup failed");
                    }
                }
                Err(err) if attribute::is_unsupported(&err) => {
                    debug!(
                        path = %path.display(),
                        "extended attributes unsupported, writing sidecar record"
                    );
                    self.sidecar.write(path, &value)?;
                }
                Err(err) => return Err(err.into()),
            },
        }
        Ok(())
    }

    /// Expiration of `path`, or `None` when there is no readable record.
    pub fn get(&self, path: &Path) -> Option<DateTime<Utc>> {
        let raw = match self.mode {
            MetadataMode::Xattr => read_quietly(&self.attribute, path),
            MetadataMode::Sidecar => read_quietly(&self.sidecar, path),
            MetadataMode::Auto => read_quietly(&self.attribute, path)
                .or_else(|| read_quietly(&self.sidecar, path)),
        }?;

        match parse_instant(&raw) {
            Some(instant) => Some(instant),
            None => {
                debug!(path = %path.display(), value = %raw.trim(), "ignoring unparsable expiration record");
                None
            }
        }
    }

    /// Drop the record for `path`. Removing a record that does not exist
    /// succeeds.
    pub fn remove(&self, path: &Path) -> Result<()> {
        match self.mode {
            MetadataMode::Xattr => self.attribute.clear(path)?,
            MetadataMode::Sidecar => self.sidecar.clear(path)?,
            MetadataMode::Auto => {
                match self.attribute.clear(path) {
                    Ok(()) => {}
                    Err(err) if attribute::is_unsupported(&err) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                self.sidecar.clear(path)?;
            }
        }
        Ok(())
    }

    pub fn has(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }
}

fn read_quietly<B: RecordBackend>(backend: &B, path: &Path) -> Option<String> {
    match backend.read(path) {
        Ok(value) => value,
        Err(err) if err.kind() == io::ErrorKind::NotFound || attribute::is_unsupported(&err) => {
            None
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read expiration record");
            None
        }
    }
}

/// Canonical on-disk form: RFC 3339, UTC, whole seconds.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
