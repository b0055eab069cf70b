//! Chapters as the reader sees them.

use crate::error::ErrorKind;
use crate::loader::PageLoaderHandle;
use crate::page::ReaderPage;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tankobon_source::Chapter;
use tokio::sync::watch;
use tracing::debug;

pub type Pages = Arc<[Arc<ReaderPage>]>;

/// Loading state of a chapter. Pages only exist once loaded.
#[derive(Clone, Debug)]
pub enum ChapterState {
    Wait,
    Loading,
    Loaded(Pages),
    Error(ErrorKind),
}

impl ChapterState {
    pub fn pages(&self) -> Option<&Pages> {
        match self {
            ChapterState::Loaded(pages) => Some(pages),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ChapterState::Loaded(_))
    }
}

/// A chapter being read, plus the loader serving its pages.
///
/// Viewers [`reference`](Self::reference) a chapter while they show it and
/// [`release`](Self::release) it afterwards; when the last one lets go the
/// loader is recycled and the chapter goes back to [`ChapterState::Wait`].
pub struct ReaderChapter {
    chapter: Chapter,
    state: watch::Sender<ChapterState>,
    requested_page: AtomicUsize,
    loader: Mutex<Option<PageLoaderHandle>>,
    references: AtomicUsize,
    /// Held for the whole of a load so concurrent loads of one chapter queue up.
    pub(crate) load_lock: tokio::sync::Mutex<()>,
}

impl ReaderChapter {
    pub fn new(chapter: Chapter) -> Self {
        Self {
            chapter,
            state: watch::Sender::new(ChapterState::Wait),
            requested_page: AtomicUsize::new(0),
            loader: Mutex::new(None),
            references: AtomicUsize::new(0),
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn chapter(&self) -> &Chapter {
        &self.chapter
    }

    pub fn id(&self) -> i64 {
        self.chapter.id
    }

    pub fn state(&self) -> ChapterState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChapterState> {
        self.state.subscribe()
    }

    pub fn pages(&self) -> Option<Pages> {
        self.state.borrow().pages().cloned()
    }

    /// Loaded with at least one page.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().pages().is_some_and(|pages| !pages.is_empty())
    }

    /// Page the reader should open the chapter at.
    pub fn requested_page(&self) -> usize {
        self.requested_page.load(Ordering::Relaxed)
    }

    pub fn set_requested_page(&self, index: usize) {
        self.requested_page.store(index, Ordering::Relaxed);
    }

    pub fn loader(&self) -> Option<PageLoaderHandle> {
        self.lock_loader().clone()
    }

    pub fn reference(&self) {
        self.references.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference, recycling the loader when none are left.
    pub async fn release(&self) {
        let previous = self
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| Some(count.saturating_sub(1)))
            .unwrap_or_default();
        if previous > 1 {
            return;
        }
        if let Some(loader) = self.replace_loader(None) {
            debug!(chapter = self.id(), "recycling loader of released chapter");
            loader.recycle().await;
        }
        self.set_state(ChapterState::Wait);
    }

    pub fn references(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: ChapterState) {
        debug!(chapter = self.id(), state = ?StateName(&state), "chapter state");
        self.state.send_replace(state);
    }

    pub(crate) fn replace_loader(&self, loader: Option<PageLoaderHandle>) -> Option<PageLoaderHandle> {
        std::mem::replace(&mut *self.lock_loader(), loader)
    }

    fn lock_loader(&self) -> MutexGuard<'_, Option<PageLoaderHandle>> {
        self.loader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Logs a state without dumping every page.
struct StateName<'a>(&'a ChapterState);

impl Debug for StateName<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.0 {
            ChapterState::Wait => f.write_str("Wait"),
            ChapterState::Loading => f.write_str("Loading"),
            ChapterState::Loaded(pages) => write!(f, "Loaded({} pages)", pages.len()),
            ChapterState::Error(kind) => write!(f, "Error({kind})"),
        }
    }
}

impl Debug for ReaderChapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ReaderChapter")
            .field("id", &self.chapter.id)
            .field("state", &StateName(&self.state.borrow()))
            .field("requested_page", &self.requested_page())
            .finish_non_exhaustive()
    }
}
