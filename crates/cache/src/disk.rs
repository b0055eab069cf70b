use crate::error::{ErrorKind, Result};
use crate::journal::{EntryKind, Journal};
use crate::key::{image_key, image_path, page_list_key, page_list_path};
use crate::{ChapterCache, Database};
use async_trait::async_trait;
use exn::ResultExt;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tankobon_config::{ReaderSettings, SettingsHandle};
use tankobon_source::{Chapter, Page};
use tankobon_storage::BackendHandle;
use tankobon_storage::backend::LocalBackend;
use tankobon_storage::error::ErrorKind as StorageErrorKind;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Size-bounded chapter cache backed by storage blobs and an SQLite journal.
///
/// Writes that push the total size over capacity evict the least recently
/// used entries, which may include the entry just written if it alone is
/// larger than the whole cache.
pub struct DiskCache {
    backend: BackendHandle,
    journal: Journal,
    capacity: AtomicU64,
    /// Serialises evictions so two writers don't delete the same blobs.
    evicting: Mutex<()>,
}

impl DiskCache {
    pub fn new(db: &Database, backend: BackendHandle, capacity: u64) -> Self {
        Self { backend, journal: Journal::from(db), capacity: AtomicU64::new(capacity), evicting: Mutex::new(()) }
    }

    /// Open the cache under `settings.cache_dir`, journal and blobs side by
    /// side, sized for the configured preload amount.
    #[instrument(level = "info", skip(settings), fields(dir = %settings.cache_dir.display()))]
    pub async fn open(settings: &ReaderSettings) -> Result<Self> {
        let db = Database::connect_in_dir(&settings.cache_dir).await?;
        let backend = LocalBackend::new("chapter cache", &settings.cache_dir).or_raise(|| ErrorKind::Storage)?;
        let capacity = settings.chapter_cache_capacity();
        info!(capacity, "chapter cache opened");
        Ok(Self::new(&db, Arc::new(backend), capacity))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Change the capacity, evicting immediately if the cache is now too big.
    pub async fn set_capacity(&self, capacity: u64) -> Result<()> {
        let previous = self.capacity.swap(capacity, Ordering::Relaxed);
        if previous != capacity {
            info!(previous, capacity, "chapter cache capacity changed");
        }
        self.evict().await
    }

    /// Keep the capacity in line with the preload setting.
    ///
    /// The task ends when the settings channel closes or the cache is dropped.
    pub fn follow_settings(self: &Arc<Self>, settings: &SettingsHandle) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let mut rx = settings.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let capacity = rx.borrow_and_update().chapter_cache_capacity();
                let Some(cache) = cache.upgrade() else { break };
                if let Err(err) = cache.set_capacity(capacity).await {
                    warn!(error = ?err, "failed to resize chapter cache");
                }
            }
        })
    }

    /// Remove a cached image. Returns `false` if it wasn't cached.
    pub async fn remove(&self, image_url: &str) -> Result<bool> {
        let key = image_key(image_url);
        self.delete_blob(&image_path(&key)).await?;
        self.journal.forget(&key).await
    }

    /// Remove everything. Returns the number of bytes freed.
    #[instrument(level = "info", skip(self))]
    pub async fn clear(&self) -> Result<u64> {
        let _guard = self.evicting.lock().await;
        let mut freed = 0;
        for entry in self.journal.list_lru().await? {
            self.delete_blob(&Self::path_for(entry.kind, &entry.key)).await?;
            self.journal.forget(&entry.key).await?;
            freed += entry.size;
        }
        info!(freed, "cleared chapter cache");
        Ok(freed)
    }

    /// Total size in bytes of everything recorded in the journal.
    pub async fn size(&self) -> Result<u64> {
        self.journal.total_size().await
    }

    fn path_for(kind: EntryKind, key: &str) -> std::path::PathBuf {
        match kind {
            EntryKind::Image => image_path(key),
            EntryKind::PageList => page_list_path(key),
        }
    }

    async fn delete_blob(&self, path: &Path) -> Result<()> {
        match self.backend.delete(path).await {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.deref(), StorageErrorKind::NotFound(_)) => Ok(()),
            Err(e) => Err(e).or_raise(|| ErrorKind::Storage),
        }
    }

    /// Read a blob, dropping its journal row if the blob has gone missing.
    async fn read_blob(&self, key: &str, path: &Path, label: &str) -> Result<Option<Vec<u8>>> {
        match self.backend.read(path).await {
            Ok(data) => {
                self.journal.touch(key).await?;
                Ok(Some(data))
            },
            Err(e) if matches!(e.deref(), StorageErrorKind::NotFound(_)) => {
                if self.journal.forget(key).await? {
                    debug!(entry = label, "dropped journal row for missing blob");
                }
                Ok(None)
            },
            Err(e) => Err(e).or_raise(|| ErrorKind::Storage),
        }
    }

    async fn write_blob(&self, key: &str, kind: EntryKind, data: &[u8]) -> Result<()> {
        self.backend.write(&Self::path_for(kind, key), data).await.or_raise(|| ErrorKind::Storage)?;
        self.journal.record(key, kind, data.len()).await?;
        self.evict().await
    }

    async fn evict(&self) -> Result<()> {
        let _guard = self.evicting.lock().await;
        let capacity = self.capacity();
        let mut total = self.journal.total_size().await?;
        if total <= capacity {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        for entry in self.journal.list_lru().await? {
            if total <= capacity {
                break;
            }
            self.delete_blob(&Self::path_for(entry.kind, &entry.key)).await?;
            self.journal.forget(&entry.key).await?;
            total = total.saturating_sub(entry.size);
            debug!(
                kind = %entry.kind,
                size = entry.size,
                age_secs = (now - entry.stored_at).whole_seconds(),
                "evicted cache entry"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ChapterCache for DiskCache {
    async fn has_image(&self, image_url: &str) -> Result<bool> {
        let key = image_key(image_url);
        if self.journal.get(&key).await?.is_none() {
            return Ok(false);
        }
        let present = self.backend.exists(&image_path(&key)).await.or_raise(|| ErrorKind::Storage)?;
        if !present {
            self.journal.forget(&key).await?;
            debug!(url = image_url, "cached image vanished from storage");
        }
        Ok(present)
    }

    async fn get_image(&self, image_url: &str) -> Result<Vec<u8>> {
        let key = image_key(image_url);
        match self.read_blob(&key, &image_path(&key), image_url).await? {
            Some(data) => Ok(data),
            None => exn::bail!(ErrorKind::NotFound(image_url.to_string())),
        }
    }

    #[instrument(level = "debug", skip(self, data), fields(size = data.len()))]
    async fn put_image(&self, image_url: &str, data: Vec<u8>) -> Result<()> {
        self.write_blob(&image_key(image_url), EntryKind::Image, &data).await
    }

    async fn get_page_list(&self, chapter: &Chapter) -> Result<Option<Vec<Page>>> {
        let key = page_list_key(chapter);
        let Some(data) = self.read_blob(&key, &page_list_path(&key), &chapter.url).await? else {
            return Ok(None);
        };
        let pages = serde_json::from_slice(&data).or_raise(|| ErrorKind::InvalidData("page list"))?;
        Ok(Some(pages))
    }

    #[instrument(level = "debug", skip(self, chapter, pages), fields(chapter = chapter.id, pages = pages.len()))]
    async fn put_page_list(&self, chapter: &Chapter, pages: &[Page]) -> Result<()> {
        let data = serde_json::to_vec(pages).or_raise(|| ErrorKind::InvalidData("page list"))?;
        self.write_blob(&page_list_key(chapter), EntryKind::PageList, &data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tankobon_storage::StorageBackend;
    use tankobon_storage::backend::MockBackend;

    async fn cache(capacity: u64) -> (DiskCache, Arc<MockBackend>) {
        let db = Database::connect_in_memory().await.unwrap();
        let backend = Arc::new(MockBackend::default());
        (DiskCache::new(&db, backend.clone(), capacity), backend)
    }

    #[tokio::test]
    async fn test_image_round_trip() {
        let (cache, _) = cache(1024).await;
        assert!(!cache.has_image("https://i/1").await.unwrap());
        cache.put_image("https://i/1", b"png".to_vec()).await.unwrap();
        assert!(cache.has_image("https://i/1").await.unwrap());
        assert_eq!(cache.get_image("https://i/1").await.unwrap(), b"png");
        assert_eq!(cache.size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_get_missing_image() {
        let (cache, _) = cache(1024).await;
        let err = cache.get_image("https://i/none").await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("https://i/none".to_string()));
    }

    #[tokio::test]
    async fn test_vanished_blob_is_a_miss() {
        let (cache, backend) = cache(1024).await;
        cache.put_image("https://i/1", b"png".to_vec()).await.unwrap();
        backend.delete(&image_path(&image_key("https://i/1"))).await.unwrap();
        assert!(!cache.has_image("https://i/1").await.unwrap());
        assert_eq!(cache.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let (cache, backend) = cache(10).await;
        cache.put_image("a", vec![0; 4]).await.unwrap();
        cache.put_image("b", vec![0; 4]).await.unwrap();
        // Reading `a` makes `b` the eviction candidate.
        cache.get_image("a").await.unwrap();
        cache.put_image("c", vec![0; 4]).await.unwrap();
        assert!(cache.has_image("a").await.unwrap());
        assert!(!cache.has_image("b").await.unwrap());
        assert!(cache.has_image("c").await.unwrap());
        assert_eq!(cache.size().await.unwrap(), 8);
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn test_shrinking_capacity_evicts() {
        let (cache, _) = cache(100).await;
        for url in ["a", "b", "c"] {
            cache.put_image(url, vec![0; 10]).await.unwrap();
        }
        cache.set_capacity(15).await.unwrap();
        assert_eq!(cache.size().await.unwrap(), 10);
        assert!(cache.has_image("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_page_list_round_trip() {
        let (cache, _) = cache(1024).await;
        let chapter = Chapter::new(1, 9, "/c/1", "Ch. 1");
        assert!(cache.get_page_list(&chapter).await.unwrap().is_none());
        let pages = vec![Page::new(0, "/c/1/0").with_image_url("https://i/0"), Page::new(1, "/c/1/1")];
        cache.put_page_list(&chapter, &pages).await.unwrap();
        assert_eq!(cache.get_page_list(&chapter).await.unwrap(), Some(pages));
        let other = Chapter::new(2, 10, "/c/1", "Ch. 1");
        assert!(cache.get_page_list(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_page_list() {
        let (cache, backend) = cache(1024).await;
        let chapter = Chapter::new(1, 9, "/c/1", "Ch. 1");
        backend.write(&page_list_path(&page_list_key(&chapter)), b"{not json").await.unwrap();
        let err = cache.get_page_list(&chapter).await.unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("page list"));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (cache, backend) = cache(1024).await;
        cache.put_image("a", vec![0; 3]).await.unwrap();
        cache.put_image("b", vec![0; 5]).await.unwrap();
        assert!(cache.remove("a").await.unwrap());
        assert!(!cache.remove("a").await.unwrap());
        cache.put_page_list(&Chapter::new(1, 1, "/c", "c"), &[Page::new(0, "/p")]).await.unwrap();
        let freed = cache.clear().await.unwrap();
        assert!(freed > 5);
        assert_eq!(cache.size().await.unwrap(), 0);
        assert_eq!(backend.len().await, 0);
    }

    #[tokio::test]
    async fn test_follow_settings() {
        let (cache, _) = cache(1).await;
        let cache = Arc::new(cache);
        let settings = SettingsHandle::new(ReaderSettings::default());
        let task = cache.follow_settings(&settings);
        settings.set_preload_page_amount(4).unwrap();
        let expected = settings.current().chapter_cache_capacity();
        for _ in 0..100 {
            if cache.capacity() == expected {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.capacity(), expected);
        drop(settings);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_on_local_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_in_dir(dir.path()).await.unwrap();
        let backend = Arc::new(LocalBackend::new("cache", dir.path()).unwrap());
        let cache = DiskCache::new(&db, backend, 1024);
        cache.put_image("https://i/1", b"jpeg".to_vec()).await.unwrap();
        assert!(dir.path().join(image_path(&image_key("https://i/1"))).is_file());
        assert_eq!(cache.get_image("https://i/1").await.unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_open_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ReaderSettings {
            preload_page_amount: 4,
            cache_dir: dir.path().join("chapter_disk_cache"),
            ..Default::default()
        };
        let cache = DiskCache::open(&settings).await.unwrap();
        assert_eq!(cache.capacity(), settings.chapter_cache_capacity());
        cache.put_image("https://i/1", b"webp".to_vec()).await.unwrap();
        assert!(settings.cache_dir.join("journal.db").is_file());
        assert!(settings.cache_dir.join(image_path(&image_key("https://i/1"))).is_file());
    }
}
