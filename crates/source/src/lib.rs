//! Content source models and capability.
//!
//! A [`Source`] is anything that can list the pages of a chapter, resolve a
//! page to its image URL and fetch image bytes. Scraping a particular site is
//! not this crate's concern; it only fixes the shape of the conversation so
//! the reader can drive any source the same way.

pub mod error;
mod models;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use crate::models::{Chapter, Manga, Page};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockSource;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Shared handle to a source, as held by loaders and the dispatcher.
pub type SourceHandle = Arc<dyn Source>;

/// Remote origin of chapter pages.
///
/// Implementations must be safe to call from several tasks at once; the
/// reader never holds a lock across a call. A call that gives up because the
/// caller went away should fail with [`ErrorKind::Cancelled`] so the reader
/// can tell it apart from a real failure.
///
/// [`ErrorKind::Cancelled`]: crate::error::ErrorKind::Cancelled
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable name, used for logging and for the download directory layout.
    fn name(&self) -> &str;

    /// Ordered page list of a chapter. Indexes may be reassigned by the caller.
    async fn get_page_list(&self, chapter: &Chapter) -> Result<Vec<Page>>;

    /// Resolve a page whose `image_url` is not known yet.
    async fn get_image_url(&self, page: &Page) -> Result<String>;

    /// Fetch the image bytes of a page with a resolved `image_url`.
    async fn get_image(&self, page: &Page) -> Result<Vec<u8>>;
}
