//! The storage trait and its implementations.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::models::DirEntry;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub(crate) type DirEntryStream<'a> = Pin<Box<dyn Stream<Item = Result<DirEntry>> + Send + 'a>>;

/// Somewhere to keep chapter files.
///
/// Paths are relative to the backend root and pass through
/// [`validate_path`](crate::validate_path) before use, so nothing can
/// escape the root.
///
/// ```
/// use std::path::Path;
/// use tankobon_storage::{StorageBackend, error::Result};
///
/// async fn page_count(backend: &dyn StorageBackend) -> Result<usize> {
///     let chapter = Path::new("MangaDex/Berserk/Chapter 1");
///     Ok(backend.read_dir(chapter).await?.iter().filter(|entry| entry.is_file()).count())
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Used in logs only.
    fn name(&self) -> &str;

    /// Direct children of `dir`, in no particular order.
    async fn read_dir(&self, dir: &Path) -> Result<Vec<DirEntry>> {
        self.read_dir_stream(dir).try_collect().await
    }

    /// Stream the direct children of `dir`. A missing directory is empty.
    fn read_dir_stream<'a>(&'a self, dir: &'a Path) -> DirEntryStream<'a>;

    /// Whether a file or directory exists at `path`.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Fails with [`NotFound`](crate::error::ErrorKind::NotFound) for missing
    /// files.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or replace a file, creating its parents.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Fails with [`NotFound`](crate::error::ErrorKind::NotFound) for missing
    /// files.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Filesystem location of `path`, for readers that need to seek (zip
    /// archives). `None` means the bytes have to be copied out first.
    fn local_path(&self, path: &Path) -> Option<PathBuf> {
        let _ = path;
        None
    }
}
