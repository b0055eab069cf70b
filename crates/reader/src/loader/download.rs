//! Loading pages of a downloaded chapter.

use super::PageLoader;
use crate::downloads::{ChapterArchive, DownloadProviderHandle};
use crate::error::{ErrorKind, Result};
use crate::page::{ImageStream, PageState, ReaderPage};
use async_trait::async_trait;
use exn::ResultExt;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::io::{Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tankobon_archive::Archive;
use tankobon_source::{Chapter, Manga};
use tokio::sync::OnceCell;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

/// Serves pages straight from the downloads directory.
///
/// A chapter downloaded as an archive is read entry by entry; one downloaded
/// as a directory is read file by file. Either way every page is `Ready` as
/// soon as the list is built and nothing is queued.
pub struct DownloadPageLoader {
    chapter: Chapter,
    manga: Manga,
    provider: DownloadProviderHandle,
    pages: OnceCell<Vec<Arc<ReaderPage>>>,
    archive: Mutex<Option<Archive>>,
    recycled: AtomicBool,
}

impl DownloadPageLoader {
    pub fn new(chapter: Chapter, manga: Manga, provider: DownloadProviderHandle) -> Self {
        Self {
            chapter,
            manga,
            provider,
            pages: OnceCell::new(),
            archive: Mutex::new(None),
            recycled: AtomicBool::new(false),
        }
    }

    async fn build_pages(&self) -> Result<Vec<Arc<ReaderPage>>> {
        if let Some(found) = self.provider.find_chapter_archive(&self.chapter, &self.manga).await? {
            let archive = open_archive(&found).await?;
            let entries = {
                let archive = archive.clone();
                spawn_blocking(move || archive.image_entries())
                    .await
                    .or_raise(|| ErrorKind::Archive)?
                    .or_raise(|| ErrorKind::Archive)?
            };
            info!(path = %found.path.display(), pages = entries.len(), "reading chapter from archive");
            let pages = entries
                .into_iter()
                .enumerate()
                .map(|(index, entry)| {
                    let stream = ImageStream::archive(archive.clone(), entry.clone());
                    Arc::new(ReaderPage::local(index, entry, stream))
                })
                .collect();
            *self.archive.lock().unwrap_or_else(PoisonError::into_inner) = Some(archive);
            return Ok(pages);
        }

        let pages = self.provider.build_page_list(&self.manga.source, &self.manga, &self.chapter).await?;
        info!(chapter = self.chapter.id, pages = pages.len(), "reading chapter from directory");
        Ok(pages
            .into_iter()
            .map(|page| {
                let name = page.name();
                Arc::new(ReaderPage::local(page.index, name, ImageStream::storage(page.backend, page.path)))
            })
            .collect())
    }
}

/// Open an archive in place when the backend exposes a filesystem path,
/// otherwise copy it to an anonymous temporary file first.
async fn open_archive(found: &ChapterArchive) -> Result<Archive> {
    if let Some(path) = found.backend.local_path(&found.path) {
        return spawn_blocking(move || Archive::open(&path))
            .await
            .or_raise(|| ErrorKind::Archive)?
            .or_raise(|| ErrorKind::Archive);
    }
    debug!(path = %found.path.display(), "copying archive out of storage");
    let data = found.backend.read(&found.path).await.or_raise(|| ErrorKind::Storage)?;
    spawn_blocking(move || -> Result<Archive> {
        let mut file = tempfile::tempfile().or_raise(|| ErrorKind::Storage)?;
        file.write_all(&data).or_raise(|| ErrorKind::Storage)?;
        file.rewind().or_raise(|| ErrorKind::Storage)?;
        Archive::from_file(file).or_raise(|| ErrorKind::Archive)
    })
    .await
    .or_raise(|| ErrorKind::Archive)?
}

#[async_trait]
impl PageLoader for DownloadPageLoader {
    fn is_local(&self) -> bool {
        true
    }

    async fn get_pages(&self) -> Result<Vec<Arc<ReaderPage>>> {
        if self.is_recycled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(self.pages.get_or_try_init(|| self.build_pages()).await?.clone())
    }

    async fn load_page(&self, page: &Arc<ReaderPage>) -> Result<PageState> {
        if self.is_recycled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(page.state())
    }

    fn retry_page(&self, page: &Arc<ReaderPage>) {
        if self.is_recycled() {
            return;
        }
        if page.state() == PageState::Error {
            debug!(page = page.index(), "retrying local page");
            page.set_state(PageState::Ready);
        }
    }

    async fn read_image(&self, page: &Arc<ReaderPage>) -> Result<Vec<u8>> {
        let (stream, generation) = page.ready_stream()?;
        match stream.read().await {
            Ok(data) => Ok(data),
            Err(err) => {
                warn!(page = page.index(), error = ?err, "failed to read local page");
                page.read_failed(generation, PageState::Error);
                Err(err)
            },
        }
    }

    async fn recycle(&self) {
        if self.recycled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.archive.lock().unwrap_or_else(PoisonError::into_inner).take();
        debug!(chapter = self.chapter.id, "download page loader recycled");
    }

    fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::Acquire)
    }
}

impl Debug for DownloadPageLoader {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DownloadPageLoader")
            .field("chapter", &self.chapter.id)
            .field("pages", &self.pages.get().map(Vec::len))
            .field("recycled", &self.is_recycled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloads::StorageDownloadProvider;
    use crate::testing::{PNG, corrupt, damage_local_header, zip_bytes};
    use std::path::Path;
    use tankobon_storage::StorageBackend;
    use tankobon_storage::backend::{LocalBackend, MockBackend};

    fn manga() -> Manga {
        Manga::new(1, "Yotsuba&!", "MangaDex")
    }

    fn chapter() -> Chapter {
        Chapter::new(1, 1, "/c/1", "Ch. 1")
    }

    fn page(tag: &str) -> Vec<u8> {
        let mut data = PNG.to_vec();
        data.extend_from_slice(format!("payload of {tag}").as_bytes());
        data
    }

    fn loader(backend: impl StorageBackend + Send + Sync + 'static) -> DownloadPageLoader {
        let provider = StorageDownloadProvider::new(Arc::new(backend));
        DownloadPageLoader::new(chapter(), manga(), Arc::new(provider))
    }

    fn names(pages: &[Arc<ReaderPage>]) -> Vec<&str> {
        pages.iter().map(|page| page.url()).collect()
    }

    #[tokio::test]
    async fn test_archive_pages_in_reading_order() {
        let archive = zip_bytes(&[
            ("page10.png", &page("10")[..]),
            ("page2.png", &page("2")[..]),
            ("page1.png", &page("1")[..]),
            ("ComicInfo.xml", &b"<ComicInfo/>"[..]),
        ]);
        let loader = loader(MockBackend::with_files([("MangaDex/Yotsuba&!/Ch. 1.cbz", archive)]));
        assert!(loader.is_local());

        let pages = loader.get_pages().await.unwrap();
        assert_eq!(names(&pages), ["page1.png", "page2.png", "page10.png"]);
        assert!(pages.iter().all(|page| page.state() == PageState::Ready && page.is_local()));
        assert_eq!(loader.read_image(&pages[1]).await.unwrap(), page("2"));
        assert_eq!(loader.load_page(&pages[2]).await.unwrap(), PageState::Ready);
    }

    #[tokio::test]
    async fn test_archive_opened_in_place_from_local_storage() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("downloads", dir.path()).unwrap();
        let archive = zip_bytes(&[("001.png", &page("1")[..]), ("002.png", &page("2")[..])]);
        backend.write(Path::new("MangaDex/Yotsuba&!/Ch. 1.zip"), &archive).await.unwrap();

        let loader = loader(backend);
        let pages = loader.get_pages().await.unwrap();
        assert_eq!(names(&pages), ["001.png", "002.png"]);
        assert_eq!(loader.read_image(&pages[0]).await.unwrap(), page("1"));
    }

    #[tokio::test]
    async fn test_corrupt_entry_fails_only_its_page() {
        let mut archive = zip_bytes(&[("001.png", &page("one")[..]), ("002.png", &page("two")[..])]);
        corrupt(&mut archive, b"payload of two");
        let loader = loader(MockBackend::with_files([("MangaDex/Yotsuba&!/Ch. 1.cbz", archive)]));

        let pages = loader.get_pages().await.unwrap();
        assert_eq!(pages.len(), 2);
        let err = loader.read_image(&pages[1]).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Archive);
        assert_eq!(pages[1].state(), PageState::Error);
        assert_eq!(loader.load_page(&pages[1]).await.unwrap(), PageState::Error);
        assert_eq!(loader.read_image(&pages[0]).await.unwrap(), page("one"));

        loader.retry_page(&pages[1]);
        assert_eq!(pages[1].state(), PageState::Ready);
    }

    #[tokio::test]
    async fn test_damaged_entry_header_fails_only_its_page() {
        let mut archive = zip_bytes(&[("001.png", &page("one")[..]), ("002.png", &page("two")[..])]);
        damage_local_header(&mut archive, 1);
        let loader = loader(MockBackend::with_files([("MangaDex/Yotsuba&!/Ch. 1.cbz", archive)]));

        let pages = loader.get_pages().await.unwrap();
        assert_eq!(names(&pages), ["001.png", "002.png"]);
        assert_eq!(loader.read_image(&pages[0]).await.unwrap(), page("one"));
        let err = loader.read_image(&pages[1]).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Archive);
        assert_eq!(pages[1].state(), PageState::Error);
        assert_eq!(pages[0].state(), PageState::Ready);
    }

    #[tokio::test]
    async fn test_retry_after_recycle_is_ignored() {
        let mut archive = zip_bytes(&[("001.png", &page("one")[..])]);
        corrupt(&mut archive, b"payload of one");
        let loader = loader(MockBackend::with_files([("MangaDex/Yotsuba&!/Ch. 1.cbz", archive)]));
        let pages = loader.get_pages().await.unwrap();
        assert!(loader.read_image(&pages[0]).await.is_err());
        assert_eq!(pages[0].state(), PageState::Error);

        loader.recycle().await;
        loader.retry_page(&pages[0]);
        assert_eq!(pages[0].state(), PageState::Error);
    }

    #[tokio::test]
    async fn test_unreadable_archive() {
        let loader = loader(MockBackend::with_files([("MangaDex/Yotsuba&!/Ch. 1.cbz", b"not a zip".to_vec())]));
        let err = loader.get_pages().await.unwrap_err();
        assert_eq!(*err, ErrorKind::Archive);
    }

    #[tokio::test]
    async fn test_directory_pages() {
        let loader = loader(MockBackend::with_files([
            ("MangaDex/Yotsuba&!/Ch. 1/10.jpg", page("10")),
            ("MangaDex/Yotsuba&!/Ch. 1/9.jpg", page("9")),
            ("MangaDex/Yotsuba&!/Ch. 1/.nomedia", Vec::new()),
        ]));
        let pages = loader.get_pages().await.unwrap();
        assert_eq!(names(&pages), ["9.jpg", "10.jpg"]);
        assert_eq!(pages[1].index(), 1);
        assert_eq!(loader.read_image(&pages[1]).await.unwrap(), page("10"));
    }

    #[tokio::test]
    async fn test_missing_download() {
        let loader = loader(MockBackend::default());
        let err = loader.get_pages().await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotDownloaded("Ch. 1".to_string()));
    }

    #[tokio::test]
    async fn test_recycle() {
        let loader = loader(MockBackend::with_files([("MangaDex/Yotsuba&!/Ch. 1/1.png", page("1"))]));
        let pages = loader.get_pages().await.unwrap();
        loader.recycle().await;
        loader.recycle().await;
        assert!(loader.is_recycled());
        assert!(loader.get_pages().await.unwrap_err().is_cancelled());
        assert!(loader.load_page(&pages[0]).await.unwrap_err().is_cancelled());
    }
}
