//! Chapter cache for page images and page lists.
//!
//! The cache is disposable: deleting it only costs a re-download. Blobs live
//! on a [`StorageBackend`](tankobon_storage::StorageBackend) under hashed
//! names, and a small SQLite journal records each blob's size and how
//! recently it was used so the cache can stay under its byte capacity by
//! evicting the least recently used entries first.
//!
//! # Layout
//! - `images/<blake3(image url)>`: raw image bytes
//! - `pages/<blake3(manga id + chapter url)>.json`: serialized page list

mod db;
mod disk;
pub mod error;
mod journal;
mod key;

pub use crate::db::Database;
pub use crate::disk::DiskCache;
pub use crate::journal::EntryKind;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tankobon_source::{Chapter, Page};

/// Shared handle to a chapter cache.
pub type CacheHandle = Arc<dyn ChapterCache>;

/// What the page loaders need from a cache.
///
/// Implementations synchronise internally; the same handle is shared by
/// every loader.
#[async_trait]
pub trait ChapterCache: Send + Sync {
    async fn has_image(&self, image_url: &str) -> Result<bool>;

    async fn get_image(&self, image_url: &str) -> Result<Vec<u8>>;

    async fn put_image(&self, image_url: &str, data: Vec<u8>) -> Result<()>;

    /// Previously stored page list for a chapter, if any.
    async fn get_page_list(&self, chapter: &Chapter) -> Result<Option<Vec<Page>>>;

    async fn put_page_list(&self, chapter: &Chapter, pages: &[Page]) -> Result<()>;
}
