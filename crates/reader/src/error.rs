//! Reader Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Collaborator failures (source, cache, storage,
//! archive) are raised into one of the kinds below so callers only match on
//! what they can act on.

use derive_more::{Display, Error};
use exn::ResultExt;

/// A reader error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The work was abandoned: the loader was recycled, or the source gave up
    /// because its caller went away. Never recorded as a page or chapter error.
    #[display("cancelled")]
    Cancelled,
    /// The chapter resolved to zero pages.
    #[display("chapter has no pages")]
    EmptyPageList,
    /// A chapter names a merged source nobody registered.
    #[display("unknown source: {_0}")]
    UnknownSource(#[error(not(source))] String),
    /// The chapter was expected on disk but neither an archive nor a page
    /// directory exists.
    #[display("chapter not downloaded: {_0}")]
    NotDownloaded(#[error(not(source))] String),
    /// The page has no image to read yet.
    #[display("page {_0} is not ready")]
    NotReady(#[error(not(source))] usize),
    #[display("source error")]
    Source,
    #[display("chapter cache error")]
    Cache,
    #[display("download storage error")]
    Storage,
    #[display("archive error")]
    Archive,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Source | ErrorKind::Cache | ErrorKind::Storage)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ErrorKind::Cancelled)
    }
}

/// Raise source failures into [`ErrorKind::Source`], keeping cancellation
/// distinguishable as [`ErrorKind::Cancelled`].
pub(crate) trait SourceResultExt<T> {
    fn or_raise_source(self) -> Result<T>;
}

impl<T> SourceResultExt<T> for tankobon_source::error::Result<T> {
    fn or_raise_source(self) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => {
                let kind = if err.is_cancelled() { ErrorKind::Cancelled } else { ErrorKind::Source };
                Err(err).or_raise(|| kind)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tankobon_source::error::ErrorKind as SourceErrorKind;

    #[test]
    fn source_cancellation_stays_cancellation() {
        let cancelled: tankobon_source::error::Result<()> = Err(exn::Exn::from(SourceErrorKind::Cancelled));
        assert!(cancelled.or_raise_source().unwrap_err().is_cancelled());
        let failed: tankobon_source::error::Result<()> = Err(exn::Exn::from(SourceErrorKind::Network("reset".into())));
        let err = failed.or_raise_source().unwrap_err();
        assert_eq!(*err, ErrorKind::Source);
        assert!(err.is_retryable());
    }
}
