//! Extended attribute storage for expiration records.

use std::io;
use std::path::Path;

use super::RecordBackend;

/// Attribute name. Linux only allows unprivileged writes inside the `user.`
/// namespace; macOS and the BSDs take the bare reverse-DNS key.
#[cfg(target_os = "linux")]
pub const EXPIRATION_ATTRIBUTE: &str = "user.com.expirefiles.metadata.expiration";
#[cfg(not(target_os = "linux"))]
pub const EXPIRATION_ATTRIBUTE: &str = "com.expirefiles.metadata.expiration";

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AttributeBackend;

#[cfg(unix)]
impl RecordBackend for AttributeBackend {
    fn read(&self, path: &Path) -> io::Result<Option<String>> {
        if !xattr::SUPPORTED_PLATFORM {
            return Err(unsupported());
        }
        match xattr::get(path, EXPIRATION_ATTRIBUTE)? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    fn write(&self, path: &Path, value: &str) -> io::Result<()> {
        if !xattr::SUPPORTED_PLATFORM {
            return Err(unsupported());
        }
        xattr::set(path, EXPIRATION_ATTRIBUTE, value.as_bytes())
    }

    fn clear(&self, path: &Path) -> io::Result<()> {
        if !xattr::SUPPORTED_PLATFORM {
            return Err(unsupported());
        }
        // Removing a missing attribute is an error at the syscall level.
        if xattr::get(path, EXPIRATION_ATTRIBUTE)?.is_none() {
            return Ok(());
        }
        xattr::remove(path, EXPIRATION_ATTRIBUTE)
    }
}

#[cfg(not(unix))]
impl RecordBackend for AttributeBackend {
    fn read(&self, _path: &Path) -> io::Result<Option<String>> {
        Err(unsupported())
    }

    fn write(&self, _path: &Path, _value: &str) -> io::Result<()> {
        Err(unsupported())
    }

    fn clear(&self, _path: &Path) -> io::Result<()> {
        Err(unsupported())
    }
}

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "extended attributes are not available on this platform",
    )
}

/// True when the error means "this filesystem has no attribute support"
/// rather than a genuine failure of the write.
pub(crate) fn is_unsupported(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }

    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(code) if code == libc::ENOTSUP || code == libc::EOPNOTSUPP
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}
