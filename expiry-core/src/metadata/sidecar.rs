//! Sidecar files for filesystems without extended attribute support.
//!
//! A record for `<dir>/<name>` lives at
//! `<dir>/.expire-metadata/<name>.expiration` and holds the timestamp text.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::RecordBackend;

pub const SIDECAR_DIR: &str = ".expire-metadata";
pub const SIDECAR_SUFFIX: &str = ".expiration";

/// Deterministic sidecar location for `file_path`.
pub fn sidecar_path(file_path: &Path) -> Option<PathBuf> {
    let parent = file_path.parent()?;
    let name = file_path.file_name()?;
    let mut record_name = name.to_os_string();
    record_name.push(SIDECAR_SUFFIX);
    Some(parent.join(SIDECAR_DIR).join(record_name))
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SidecarBackend;

impl RecordBackend for SidecarBackend {
    fn read(&self, path: &Path) -> io::Result<Option<String>> {
        let Some(record) = sidecar_path(path) else {
            return Ok(None);
        };
        match fs::read_to_string(&record) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write(&self, path: &Path, value: &str) -> io::Result<()> {
        let record = sidecar_path(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no sidecar location for {}", path.display()),
            )
        })?;
        let dir = record
            .parent()
            .ok_or_else(|| io::Error::other("sidecar record has no parent"))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&record).map_err(|err| err.error)?;
        Ok(())
    }

    fn clear(&self, path: &Path) -> io::Result<()> {
        let Some(record) = sidecar_path(path) else {
            return Ok(());
        };
        match fs::remove_file(&record) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        }

        // Drop the metadata directory once its last record is gone.
        if let Some(dir) = record.parent()
            && fs::read_dir(dir).map(|mut entries| entries.next().is_none()).unwrap_or(false)
        {
            let _ = fs::remove_dir(dir);
        }
        Ok(())
    }
}
