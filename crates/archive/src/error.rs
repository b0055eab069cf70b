//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The archive file could not be opened or read.
    #[display("I/O error")]
    Io,
    /// The file is not a readable archive (bad central directory, wrong format).
    #[display("invalid or corrupted archive")]
    InvalidArchive,
    /// No entry with that name exists in the archive.
    #[display("entry not found: {_0}")]
    EntryNotFound(#[error(not(source))] String),
    /// The entry exists but its data is damaged (bad checksum, truncated).
    #[display("corrupted entry: {_0}")]
    CorruptEntry(#[error(not(source))] String),
    /// The file name doesn't look like any archive we can read.
    #[display("unsupported archive format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}
