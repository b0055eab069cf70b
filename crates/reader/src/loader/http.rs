//! Loading pages from a remote source.

use super::PageLoader;
use crate::error::{ErrorKind, Result, SourceResultExt};
use crate::page::{ImageStream, PageState, ReaderPage};
use crate::queue::{PRIORITY_PRELOAD, PRIORITY_REQUEST, PRIORITY_RETRY, PriorityQueue};
use async_trait::async_trait;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tankobon_cache::CacheHandle;
use tankobon_config::SettingsHandle;
use tankobon_source::{Chapter, Page, SourceHandle};
use tokio::sync::{OnceCell, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, instrument, trace, warn};

struct Inner {
    chapter: Chapter,
    source: SourceHandle,
    cache: CacheHandle,
    settings: SettingsHandle,
    queue: PriorityQueue,
    pages: OnceCell<Vec<Arc<ReaderPage>>>,
    cancel: CancellationToken,
    recycled: AtomicBool,
}

/// Loads pages of a chapter from its source, through the chapter cache.
///
/// Pages are fetched one at a time by a background task that serves a
/// [priority queue](crate::PRIORITY_RETRY): retries first, then pages the
/// reader asked for, then preloads. Requesting a page also queues the next
/// few pages (see `preload_page_amount`) so they are ready by the time the
/// reader gets there.
///
/// Recycling stops the background task and persists the page list, including
/// resolved image URLs, so the next loader for the chapter can skip straight
/// to the cache. A fetch already under way is left to finish and land in the
/// cache; only the wait for the next entry is cut short.
pub struct HttpPageLoader {
    inner: Arc<Inner>,
}

impl HttpPageLoader {
    /// Create the loader and start its consumer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(chapter: Chapter, source: SourceHandle, cache: CacheHandle, settings: SettingsHandle) -> Self {
        let inner = Arc::new(Inner {
            chapter,
            source,
            cache,
            settings,
            queue: PriorityQueue::default(),
            pages: OnceCell::new(),
            cancel: CancellationToken::new(),
            recycled: AtomicBool::new(false),
        });
        let span = info_span!("page_consumer", chapter = inner.chapter.id, source = inner.source.name());
        tokio::spawn(Arc::clone(&inner).consume().instrument(span));
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &PriorityQueue {
        &self.inner.queue
    }

    /// Queue the pages after `page` that haven't been loaded or queued yet.
    fn preload_after(&self, page: &ReaderPage, enqueued: &mut EnqueueGuard<'_>) {
        let amount = self.inner.settings.preload_page_amount();
        let Some(pages) = self.inner.pages.get() else {
            return;
        };
        let mut queued = 0;
        for next in pages.iter().skip(page.index() + 1).take(amount) {
            if next.state() == PageState::Queued && !self.inner.queue.contains(next) {
                enqueued.push(Arc::clone(next), PRIORITY_PRELOAD);
                queued += 1;
            }
        }
        if queued > 0 {
            trace!(page = page.index(), queued, "preloading pages");
        }
    }
}

impl Inner {
    async fn consume(self: Arc<Self>) {
        debug!("page consumer started");
        loop {
            let entry = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                entry = self.queue.pop() => entry,
            };
            let page = entry.page;
            if page.state() != PageState::Queued {
                continue;
            }
            match self.resolve(&page).await {
                Ok(()) => {},
                // A source giving up on its own is an ordinary failure; only
                // recycling puts the page back.
                Err(err) if err.is_cancelled() && self.cancel.is_cancelled() => {
                    page.requeue_cancelled();
                },
                Err(err) => {
                    warn!(page = page.index(), error = ?err, "failed to load page");
                    page.set_state(PageState::Error);
                },
            }
        }
        debug!("page consumer stopped");
    }

    /// Drive one queued page to `Ready`, or fail.
    async fn resolve(&self, page: &ReaderPage) -> Result<()> {
        let image_url = match page.image_url() {
            Some(image_url) => image_url.to_string(),
            None => {
                page.set_state(PageState::ResolvingUrl);
                let image_url = self.source.get_image_url(&page.to_page()).await.or_raise_source()?;
                page.set_image_url(image_url.clone());
                image_url
            },
        };

        let cached = self.cache.has_image(&image_url).await.unwrap_or_else(|err| {
            warn!(page = page.index(), error = ?err, "chapter cache lookup failed");
            false
        });
        if cached {
            trace!(page = page.index(), "page image served from cache");
            page.set_stream(ImageStream::cache(Arc::clone(&self.cache), image_url));
            page.set_state(PageState::Ready);
            return Ok(());
        }

        page.set_state(PageState::DownloadingImage);
        let mut request = page.to_page();
        request.image_url = Some(image_url.clone());
        let data = self.source.get_image(&request).await.or_raise_source()?;
        let stream = match self.cache.put_image(&image_url, data.clone()).await {
            Ok(()) => ImageStream::cache(Arc::clone(&self.cache), image_url),
            Err(err) => {
                warn!(page = page.index(), error = ?err, "could not cache page image, keeping it in memory");
                ImageStream::memory(data)
            },
        };
        page.set_stream(stream);
        page.set_state(PageState::Ready);
        Ok(())
    }

    async fn fetch_pages(&self) -> Result<Vec<Arc<ReaderPage>>> {
        let cached = self.cache.get_page_list(&self.chapter).await.unwrap_or_else(|err| {
            warn!(error = ?err, "failed to read cached page list");
            None
        });
        let pages = match cached {
            Some(pages) if !pages.is_empty() => {
                debug!(pages = pages.len(), "page list served from cache");
                pages
            },
            _ => self.source.get_page_list(&self.chapter).await.or_raise_source()?,
        };
        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| Arc::new(ReaderPage::remote(index, page.url, page.image_url)))
            .collect())
    }

    async fn persist_pages(&self) {
        let Some(pages) = self.pages.get().filter(|pages| !pages.is_empty()) else {
            return;
        };
        let pages: Vec<Page> = pages.iter().map(|page| page.to_page()).collect();
        if let Err(err) = self.cache.put_page_list(&self.chapter, &pages).await {
            warn!(chapter = self.chapter.id, error = ?err, "failed to persist page list");
        }
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    fn is_local(&self) -> bool {
        false
    }

    async fn get_pages(&self) -> Result<Vec<Arc<ReaderPage>>> {
        if self.is_recycled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let pages = tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            pages = self.inner.pages.get_or_try_init(|| self.inner.fetch_pages()) => pages?,
        };
        Ok(pages.clone())
    }

    #[instrument(level = "debug", skip_all, fields(chapter = self.inner.chapter.id, page = page.index()))]
    async fn load_page(&self, page: &Arc<ReaderPage>) -> Result<PageState> {
        if self.is_recycled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let rx = page.subscribe();
        match page.state() {
            PageState::Ready if page.stream().is_some_and(|stream| stream.is_cached()) => {
                let evicted = match page.image_url() {
                    Some(image_url) => !self.inner.cache.has_image(image_url).await.unwrap_or(false),
                    None => true,
                };
                if evicted {
                    debug!("cached page image is gone, fetching again");
                    page.set_state(PageState::Queued);
                }
            },
            PageState::Error => {
                page.set_state(PageState::Queued);
            },
            _ => {},
        }

        let mut enqueued = EnqueueGuard::new(&self.inner.queue);
        if page.state() == PageState::Queued {
            enqueued.push(Arc::clone(page), PRIORITY_REQUEST);
        }
        self.preload_after(page, &mut enqueued);

        let state = tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            state = wait_terminal(rx) => state?,
        };
        enqueued.disarm();
        Ok(state)
    }

    fn retry_page(&self, page: &Arc<ReaderPage>) {
        if self.is_recycled() {
            return;
        }
        if page.state() == PageState::Error {
            page.set_state(PageState::Queued);
        }
        if page.state() == PageState::Queued {
            debug!(page = page.index(), "retrying page");
            self.inner.queue.push(Arc::clone(page), PRIORITY_RETRY);
        }
    }

    async fn read_image(&self, page: &Arc<ReaderPage>) -> Result<Vec<u8>> {
        let (stream, generation) = page.ready_stream()?;
        match stream.read().await {
            Ok(data) => Ok(data),
            Err(err) => {
                warn!(page = page.index(), error = ?err, "failed to read page image");
                if stream.is_cached() && page.read_failed(generation, PageState::Queued) {
                    debug!(page = page.index(), "cached page image is gone, page requeued");
                }
                Err(err)
            },
        }
    }

    async fn recycle(&self) {
        if self.inner.recycled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.queue.clear();
        self.inner.persist_pages().await;
        debug!(chapter = self.inner.chapter.id, "network page loader recycled");
    }

    fn is_recycled(&self) -> bool {
        self.inner.recycled.load(Ordering::Acquire)
    }
}

impl Drop for HttpPageLoader {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Debug for HttpPageLoader {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HttpPageLoader")
            .field("chapter", &self.inner.chapter.id)
            .field("source", &self.inner.source.name())
            .field("queued", &self.inner.queue.len())
            .field("recycled", &self.is_recycled())
            .finish()
    }
}

async fn wait_terminal(mut rx: watch::Receiver<PageState>) -> Result<PageState> {
    match rx.wait_for(|state| state.is_terminal()).await {
        Ok(state) => Ok(*state),
        Err(_) => exn::bail!(ErrorKind::Cancelled),
    }
}

/// Queue entries made on behalf of one `load_page` call.
///
/// If the call is abandoned before its page settles, entries for pages that
/// are still only queued are taken back out. Pages already being fetched are
/// left alone.
struct EnqueueGuard<'a> {
    queue: &'a PriorityQueue,
    sequences: Vec<u64>,
}

impl<'a> EnqueueGuard<'a> {
    fn new(queue: &'a PriorityQueue) -> Self {
        Self { queue, sequences: Vec::new() }
    }

    fn push(&mut self, page: Arc<ReaderPage>, priority: u8) {
        self.sequences.push(self.queue.push(page, priority));
    }

    fn disarm(mut self) {
        self.sequences.clear();
    }
}

impl Drop for EnqueueGuard<'_> {
    fn drop(&mut self) {
        if self.sequences.is_empty() {
            return;
        }
        let removed = self.queue.remove_where(&self.sequences, |entry| entry.page.state() != PageState::Queued);
        if removed > 0 {
            debug!(removed, "dropped queue entries of abandoned page request");
        }
    }
}
