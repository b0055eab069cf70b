//! Storage errors.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Empty, absolute on another drive, or climbing above the root.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    pub(crate) fn from_io(err: IoError, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn io_errors_are_classified_by_kind() {
        let missing = IoError::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(ErrorKind::from_io(missing, Path::new("a.cbz")), ErrorKind::NotFound(_)));
        let denied = IoError::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(ErrorKind::from_io(denied, Path::new("a.cbz")), ErrorKind::PermissionDenied(_)));
        let other = IoError::other("disk on fire");
        let kind = ErrorKind::from_io(other, Path::new("a.cbz"));
        assert!(matches!(kind, ErrorKind::Io(_)));
        assert!(kind.is_retryable());
    }
}
