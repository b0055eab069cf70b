//! Source Error Types

use derive_more::{Display, Error};

/// A source error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for source operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote could not be reached or answered with a server error.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The requested chapter or page doesn't exist on the remote.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The remote answered, but not with anything we understand.
    #[display("unexpected response: {_0}")]
    Parse(#[error(not(source))] String),
    /// `get_image` was called for a page without a resolved image URL.
    #[display("page {_0} has no image URL")]
    MissingImageUrl(#[error(not(source))] usize),
    /// The request was abandoned before it finished.
    #[display("request cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Network(_) | ErrorKind::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ErrorKind::Cancelled)
    }
}
