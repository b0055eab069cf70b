//! In-memory storage for tests.

use super::DirEntryStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::DirEntry;
use crate::path::validate as validate_path;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Files in a sorted map; directories exist implicitly through the files
/// below them.
///
/// It never offers a [`local_path`](StorageBackend::local_path), so it also
/// stands in for restricted storage where archives must be copied out before
/// they can be opened.
///
/// ```
/// use tankobon_storage::backend::MockBackend;
/// use tankobon_storage::StorageBackend;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = MockBackend::with_files([("Berserk/Ch. 1/001.png", b"png")]);
/// assert!(backend.exists(Path::new("Berserk/Ch. 1")).await.unwrap());
/// # }
/// ```
pub struct MockBackend {
    name: String,
    files: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
    reads: AtomicUsize,
}

impl MockBackend {
    /// Panics on paths that fail validation, since that is a broken test.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let files = files
            .into_iter()
            .map(|(path, data)| {
                let path = path.into();
                match validate_path(&path) {
                    Ok(valid) => (valid, data.into()),
                    Err(_) => panic!("MockBackend::with_files: invalid path {}", path.display()),
                }
            })
            .collect();
        Self { name: "mock".to_string(), files: RwLock::new(files), reads: AtomicUsize::new(0) }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Successful reads so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of stored files.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    async fn children(&self, dir: &Path) -> Result<Vec<DirEntry>> {
        let dir = validate_path(dir)?;
        let files = self.files.read().await;
        let mut entries: Vec<DirEntry> = Vec::new();
        for (path, data) in files.range(dir.clone()..).take_while(|(path, _)| path.starts_with(&dir)) {
            let Ok(rest) = path.strip_prefix(&dir) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let child = dir.join(first);
            let entry = match components.next() {
                None => DirEntry::file(child, data.len() as u64),
                Some(_) => DirEntry::directory(child),
            };
            // Files below one subdirectory are adjacent in the map.
            if entries.last() != Some(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn not_found(path: PathBuf) -> exn::Exn<ErrorKind> {
        exn::Exn::from(ErrorKind::NotFound(path))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_files(Vec::<(PathBuf, Vec<u8>)>::new())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_dir_stream<'a>(&'a self, dir: &'a Path) -> DirEntryStream<'a> {
        futures::stream::once(self.children(dir))
            .map_ok(|entries| futures::stream::iter(entries.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.files.read().await.keys().any(|key| key.starts_with(&path)))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let data = self.files.read().await.get(&path).cloned().ok_or_else(|| Self::not_found(path))?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.files.write().await.insert(path, data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        match self.files.write().await.remove(&path) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(path)),
        }
    }
}
