//! Page loaders and the dispatcher that picks one per chapter.

mod download;
mod http;

pub use self::download::DownloadPageLoader;
pub use self::http::HttpPageLoader;

use crate::chapter::{ChapterState, ReaderChapter};
use crate::downloads::DownloadProviderHandle;
use crate::error::{ErrorKind, Result};
use crate::page::{PageState, ReaderPage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tankobon_cache::CacheHandle;
use tankobon_config::SettingsHandle;
use tankobon_source::{Manga, SourceHandle};
use tracing::{debug, info, instrument, warn};

/// Shared handle to a page loader.
pub type PageLoaderHandle = Arc<dyn PageLoader>;

/// Produces the pages of one chapter and drives them to a terminal state.
#[async_trait]
pub trait PageLoader: Debug + Send + Sync {
    /// Whether pages come from local storage rather than a remote source.
    fn is_local(&self) -> bool;

    /// Ordered pages of the chapter. Resolved once; later calls return the
    /// same pages.
    async fn get_pages(&self) -> Result<Vec<Arc<ReaderPage>>>;

    /// Make sure `page` is (being) loaded and wait until it is `Ready` or
    /// `Error`, returning that state.
    async fn load_page(&self, page: &Arc<ReaderPage>) -> Result<PageState>;

    /// Try a failed page again, ahead of anything already waiting.
    fn retry_page(&self, page: &Arc<ReaderPage>);

    /// Read a ready page's image.
    ///
    /// A failed read is reflected in the page's state: a local page becomes
    /// `Error`, a remote page whose cached bytes are gone goes back to
    /// `Queued` for the next load.
    async fn read_image(&self, page: &Arc<ReaderPage>) -> Result<Vec<u8>>;

    /// Release everything the loader holds. Idempotent.
    async fn recycle(&self);

    fn is_recycled(&self) -> bool;
}

/// Picks a loader per chapter and manages chapter state around it.
pub struct ChapterLoader {
    manga: Manga,
    source: SourceHandle,
    merged: HashMap<String, SourceHandle>,
    downloads: DownloadProviderHandle,
    cache: CacheHandle,
    settings: SettingsHandle,
}

impl ChapterLoader {
    pub fn new(
        manga: Manga,
        source: SourceHandle,
        downloads: DownloadProviderHandle,
        cache: CacheHandle,
        settings: SettingsHandle,
    ) -> Self {
        Self { manga, source, merged: HashMap::new(), downloads, cache, settings }
    }

    /// Register a merged source, looked up by [`Source::name`](tankobon_source::Source::name).
    pub fn with_merged_source(mut self, source: SourceHandle) -> Self {
        self.merged.insert(source.name().to_string(), source);
        self
    }

    pub fn manga(&self) -> &Manga {
        &self.manga
    }

    /// Load a chapter's page list, choosing local or network loading.
    ///
    /// Does nothing if the chapter is already loaded by a live loader. On
    /// failure the chapter is left in [`ChapterState::Error`] (except for
    /// cancellation, which leaves it waiting) and the error is returned; no
    /// retry happens until this is called again.
    #[instrument(level = "info", skip_all, fields(chapter = chapter.id()))]
    pub async fn load_chapter(&self, chapter: &Arc<ReaderChapter>) -> Result<()> {
        let _load = chapter.load_lock.lock().await;
        if chapter.state().is_loaded() && chapter.loader().is_some_and(|loader| !loader.is_recycled()) {
            debug!("chapter already loaded");
            return Ok(());
        }
        chapter.set_state(ChapterState::Loading);
        let mut reset = ResetOnDrop(Some(chapter));
        let result = self.load(chapter).await;
        reset.0 = None;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => {
                chapter.set_state(ChapterState::Wait);
                Err(err)
            },
            Err(err) => {
                warn!(error = ?err, "failed to load chapter");
                chapter.set_state(ChapterState::Error((*err).clone()));
                Err(err)
            },
        }
    }

    /// Load an adjacent chapter ahead of time.
    ///
    /// Only chapters that are waiting or failed are loaded. A chapter served
    /// from the network that has since been downloaded is reloaded from disk.
    /// Failures are logged and swallowed; cancellation is passed on.
    pub async fn preload_chapter(&self, chapter: &Arc<ReaderChapter>) -> Result<()> {
        if chapter.loader().is_some_and(|loader| !loader.is_local())
            && self.downloads.is_chapter_downloaded(chapter.chapter(), &self.manga).await.unwrap_or(false)
        {
            // The loader may have been swapped while the lock was awaited.
            let _load = chapter.load_lock.lock().await;
            if let Some(loader) = chapter.loader().filter(|loader| !loader.is_local()) {
                info!(chapter = chapter.id(), "chapter was downloaded, switching to local pages");
                chapter.replace_loader(None);
                loader.recycle().await;
                chapter.set_state(ChapterState::Wait);
            }
        }
        if !matches!(chapter.state(), ChapterState::Wait | ChapterState::Error(_)) {
            return Ok(());
        }
        match self.load_chapter(chapter).await {
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                debug!(chapter = chapter.id(), error = ?err, "preloading chapter failed");
                Ok(())
            },
            Ok(()) => Ok(()),
        }
    }

    async fn load(&self, chapter: &Arc<ReaderChapter>) -> Result<()> {
        let downloaded = self.downloads.is_chapter_downloaded(chapter.chapter(), &self.manga).await?;
        let loader: PageLoaderHandle = if downloaded {
            Arc::new(DownloadPageLoader::new(
                chapter.chapter().clone(),
                self.manga.clone(),
                Arc::clone(&self.downloads),
            ))
        } else {
            Arc::new(HttpPageLoader::new(
                chapter.chapter().clone(),
                self.source_for(chapter)?,
                Arc::clone(&self.cache),
                self.settings.clone(),
            ))
        };
        info!(chapter = chapter.id(), local = loader.is_local(), "loading chapter");

        let pages = match loader.get_pages().await {
            Ok(pages) if pages.is_empty() => {
                loader.recycle().await;
                exn::bail!(ErrorKind::EmptyPageList);
            },
            Ok(pages) => pages,
            Err(err) => {
                loader.recycle().await;
                return Err(err);
            },
        };
        for page in &pages {
            page.attach_chapter(chapter.id());
        }
        if let Some(previous) = chapter.replace_loader(Some(loader)) {
            previous.recycle().await;
        }
        let details = chapter.chapter();
        if !details.read {
            chapter.set_requested_page(details.last_page_read.min(pages.len() - 1));
        }
        info!(chapter = chapter.id(), pages = pages.len(), "chapter loaded");
        chapter.set_state(ChapterState::Loaded(pages.into()));
        Ok(())
    }

    fn source_for(&self, chapter: &ReaderChapter) -> Result<SourceHandle> {
        match chapter.chapter().merged_source.as_deref() {
            None => Ok(Arc::clone(&self.source)),
            Some(name) if name == self.source.name() => Ok(Arc::clone(&self.source)),
            Some(name) => match self.merged.get(name) {
                Some(source) => Ok(Arc::clone(source)),
                None => exn::bail!(ErrorKind::UnknownSource(name.to_string())),
            },
        }
    }
}

/// Puts a chapter back to `Wait` if its load future is dropped midway.
struct ResetOnDrop<'a>(Option<&'a Arc<ReaderChapter>>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(chapter) = self.0.take() {
            debug!(chapter = chapter.id(), "chapter load abandoned");
            chapter.set_state(ChapterState::Wait);
        }
    }
}
