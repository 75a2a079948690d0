//! Directory listing shared by reconciliation, sweeps and folder browsing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Whether dot-files take part in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiddenFiles {
    Skip,
    Include,
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Regular files directly inside `dir`, sorted by path. Symlinks and
/// subdirectories are not regular files. Entries that fail to stat are
/// skipped; only failing to open `dir` itself is an error.
pub fn list_regular_files(dir: &Path, hidden: HiddenFiles) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable directory entry");
                continue;
            }
        };

        let path = entry.path();
        if hidden == HiddenFiles::Skip && is_hidden(&path) {
            continue;
        }

        match entry.file_type() {
            Ok(file_type) if file_type.is_file() => files.push(path),
            Ok(_) => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read file type");
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_only_regular_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join(".hidden"), b"h").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let visible = list_regular_files(dir.path(), HiddenFiles::Skip).unwrap();
        assert_eq!(
            visible,
            vec![dir.path().join("a.txt"), dir.path().join("b.txt")]
        );

        let all = list_regular_files(dir.path(), HiddenFiles::Include).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&dir.path().join(".hidden")));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(list_regular_files(&dir.path().join("nope"), HiddenFiles::Skip).is_err());
    }
}
