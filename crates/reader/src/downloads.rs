//! Where downloaded chapters live.
//!
//! Downloads are laid out as `<source>/<manga>/<chapter>`, where the chapter
//! is either a directory of image files or a `.cbz`/`.zip` archive next to
//! where that directory would be. Every path component is sanitised the same
//! way the downloader sanitised it when writing.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::sync::Arc;
use tankobon_archive::{ArchiveFormat, ImageType, compare_natural};
use tankobon_config::ReaderSettings;
use tankobon_source::{Chapter, Manga};
use tankobon_storage::backend::LocalBackend;
use tankobon_storage::{BackendHandle, DirEntry, sanitize_component};
use tracing::{debug, instrument};

/// Shared handle to a download provider.
pub type DownloadProviderHandle = Arc<dyn DownloadProvider>;

/// A downloaded chapter packed into a single archive.
#[derive(Clone)]
pub struct ChapterArchive {
    pub backend: BackendHandle,
    pub path: PathBuf,
}

impl Debug for ChapterArchive {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ChapterArchive").field("backend", &self.backend.name()).field("path", &self.path).finish()
    }
}

/// One loose page image of a downloaded chapter.
#[derive(Clone)]
pub struct LocalPage {
    pub index: usize,
    pub backend: BackendHandle,
    pub path: PathBuf,
}

impl LocalPage {
    pub fn name(&self) -> String {
        self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }
}

impl Debug for LocalPage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LocalPage").field("index", &self.index).field("path", &self.path).finish()
    }
}

/// What the dispatcher and the local loader need to know about downloads.
#[async_trait]
pub trait DownloadProvider: Send + Sync {
    async fn is_chapter_downloaded(&self, chapter: &Chapter, manga: &Manga) -> Result<bool>;

    /// The chapter's archive, if it was downloaded as one.
    async fn find_chapter_archive(&self, chapter: &Chapter, manga: &Manga) -> Result<Option<ChapterArchive>>;

    /// Loose page images of a chapter downloaded as a directory, in reading
    /// order. Fails with [`ErrorKind::NotDownloaded`] if there is no such
    /// directory.
    async fn build_page_list(&self, source: &str, manga: &Manga, chapter: &Chapter) -> Result<Vec<LocalPage>>;
}

/// [`DownloadProvider`] over a storage backend rooted at the downloads
/// directory.
#[derive(Clone)]
pub struct StorageDownloadProvider {
    backend: BackendHandle,
}

impl StorageDownloadProvider {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    /// Serve downloads from `settings.downloads_dir` on local disk.
    #[instrument(level = "debug", skip(settings), fields(dir = %settings.downloads_dir.display()))]
    pub fn open(settings: &ReaderSettings) -> Result<Self> {
        let backend = LocalBackend::new("downloads", &settings.downloads_dir).or_raise(|| ErrorKind::Storage)?;
        Ok(Self::new(Arc::new(backend)))
    }

    fn manga_dir(source: &str, manga: &Manga) -> PathBuf {
        PathBuf::from(sanitize_component(source)).join(sanitize_component(&manga.title))
    }

    /// Directory names a chapter may have been saved under, preferred first.
    fn chapter_dir_names(chapter: &Chapter) -> Vec<String> {
        let mut names = Vec::with_capacity(2);
        if let Some(scanlator) = chapter.scanlator.as_deref().filter(|s| !s.is_empty()) {
            names.push(sanitize_component(&format!("{scanlator}_{}", chapter.name)));
        }
        let plain = sanitize_component(&chapter.name);
        if !names.contains(&plain) {
            names.push(plain);
        }
        names
    }

    async fn find_archive(&self, source: &str, manga: &Manga, chapter: &Chapter) -> Result<Option<PathBuf>> {
        let manga_dir = Self::manga_dir(source, manga);
        for name in Self::chapter_dir_names(chapter) {
            for extension in ArchiveFormat::Zip.extensions() {
                let path = manga_dir.join(format!("{name}.{extension}"));
                if self.backend.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }

    async fn find_directory(&self, source: &str, manga: &Manga, chapter: &Chapter) -> Result<Option<PathBuf>> {
        let manga_dir = Self::manga_dir(source, manga);
        for name in Self::chapter_dir_names(chapter) {
            let path = manga_dir.join(name);
            if self.backend.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DownloadProvider for StorageDownloadProvider {
    async fn is_chapter_downloaded(&self, chapter: &Chapter, manga: &Manga) -> Result<bool> {
        if self.find_archive(&manga.source, manga, chapter).await?.is_some() {
            return Ok(true);
        }
        Ok(self.find_directory(&manga.source, manga, chapter).await?.is_some())
    }

    async fn find_chapter_archive(&self, chapter: &Chapter, manga: &Manga) -> Result<Option<ChapterArchive>> {
        Ok(self
            .find_archive(&manga.source, manga, chapter)
            .await?
            .map(|path| ChapterArchive { backend: Arc::clone(&self.backend), path }))
    }

    #[instrument(level = "debug", skip(self, manga, chapter), fields(chapter = chapter.id))]
    async fn build_page_list(&self, source: &str, manga: &Manga, chapter: &Chapter) -> Result<Vec<LocalPage>> {
        let Some(dir) = self.find_directory(source, manga, chapter).await? else {
            exn::bail!(ErrorKind::NotDownloaded(chapter.name.clone()));
        };
        let mut entries: Vec<DirEntry> = self
            .backend
            .read_dir(&dir)
            .await
            .or_raise(|| ErrorKind::Storage)?
            .into_iter()
            .filter(|entry| entry.is_file() && !entry.is_hidden() && ImageType::from_path(&entry.path).is_some())
            .collect();
        entries.sort_by(|a, b| compare_natural(a.name().unwrap_or_default(), b.name().unwrap_or_default()));
        debug!(dir = %dir.display(), pages = entries.len(), "listed downloaded pages");
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| LocalPage { index, backend: Arc::clone(&self.backend), path: entry.path })
            .collect())
    }
}
