//! Pages and their loading state.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tankobon_archive::Archive;
use tankobon_cache::CacheHandle;
use tankobon_source::Page;
use tankobon_storage::BackendHandle;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Loading state of a single page.
///
/// ```text
/// Queued ──▶ ResolvingUrl ──▶ DownloadingImage ──▶ Ready
///   │             │                  │
///   └─────────────┴──────────────────┴──▶ Error
/// ```
///
/// `Ready` and `Error` are terminal until the owning loader resets the page
/// to `Queued` (evicted bytes, retry). Local pages never queue: they start
/// `Ready` and only move between `Ready` and `Error`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum PageState {
    #[display("queued")]
    Queued,
    #[display("resolving url")]
    ResolvingUrl,
    #[display("downloading image")]
    DownloadingImage,
    #[display("ready")]
    Ready,
    #[display("error")]
    Error,
}

impl PageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PageState::Ready | PageState::Error)
    }

    /// Whether a page may move from `self` to `next`.
    pub fn can_become(self, next: PageState, local: bool) -> bool {
        use PageState::*;
        if local {
            return matches!((self, next), (Ready, Error) | (Error, Ready));
        }
        match self {
            Queued => matches!(next, ResolvingUrl | DownloadingImage | Ready | Error),
            ResolvingUrl => matches!(next, DownloadingImage | Ready | Error),
            DownloadingImage => matches!(next, Ready | Error),
            Ready | Error => next == Queued,
        }
    }
}

#[derive(Clone)]
enum Origin {
    Cache { cache: CacheHandle, image_url: String },
    Memory(Arc<[u8]>),
    Archive { archive: Archive, entry: String },
    Storage { backend: BackendHandle, path: PathBuf },
}

/// Lazy access to the bytes of a ready page.
///
/// Nothing is read until [`read`](Self::read) is called, so holding one is
/// cheap regardless of image size.
#[derive(Clone)]
pub struct ImageStream(Origin);

impl ImageStream {
    pub(crate) fn cache(cache: CacheHandle, image_url: impl Into<String>) -> Self {
        Self(Origin::Cache { cache, image_url: image_url.into() })
    }

    pub(crate) fn memory(data: Vec<u8>) -> Self {
        Self(Origin::Memory(data.into()))
    }

    pub(crate) fn archive(archive: Archive, entry: impl Into<String>) -> Self {
        Self(Origin::Archive { archive, entry: entry.into() })
    }

    pub(crate) fn storage(backend: BackendHandle, path: impl Into<PathBuf>) -> Self {
        Self(Origin::Storage { backend, path: path.into() })
    }

    /// Whether the bytes live in the chapter cache (and so can be evicted).
    pub fn is_cached(&self) -> bool {
        matches!(self.0, Origin::Cache { .. })
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        match &self.0 {
            Origin::Cache { cache, image_url } => cache.get_image(image_url).await.or_raise(|| ErrorKind::Cache),
            Origin::Memory(data) => Ok(data.to_vec()),
            Origin::Archive { archive, entry } => {
                let (archive, entry) = (archive.clone(), entry.clone());
                tokio::task::spawn_blocking(move || archive.read_entry(&entry))
                    .await
                    .or_raise(|| ErrorKind::Archive)?
                    .or_raise(|| ErrorKind::Archive)
            },
            Origin::Storage { backend, path } => backend.read(path).await.or_raise(|| ErrorKind::Storage),
        }
    }
}

impl Debug for ImageStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.0 {
            Origin::Cache { image_url, .. } => f.debug_tuple("Cache").field(image_url).finish(),
            Origin::Memory(data) => f.debug_tuple("Memory").field(&data.len()).finish(),
            Origin::Archive { entry, .. } => f.debug_tuple("Archive").field(entry).finish(),
            Origin::Storage { path, .. } => f.debug_tuple("Storage").field(path).finish(),
        }
    }
}

/// A page as the reader sees it: identity plus observable loading state.
///
/// Only the loader that produced a page changes its state. Everyone else
/// reads it, [subscribes](Self::subscribe) to it, or asks the loader for a
/// retry.
pub struct ReaderPage {
    index: usize,
    url: String,
    image_url: OnceLock<String>,
    chapter_id: OnceLock<i64>,
    local: bool,
    state: watch::Sender<PageState>,
    stream: Mutex<StreamSlot>,
}

/// The current image accessor and how many times it has been replaced.
#[derive(Default)]
struct StreamSlot {
    stream: Option<ImageStream>,
    generation: u64,
}

impl ReaderPage {
    /// A page that still has to be fetched from a source.
    pub(crate) fn remote(index: usize, url: impl Into<String>, image_url: Option<String>) -> Self {
        let resolved = OnceLock::new();
        if let Some(image_url) = image_url {
            let _ = resolved.set(image_url);
        }
        Self {
            index,
            url: url.into(),
            image_url: resolved,
            chapter_id: OnceLock::new(),
            local: false,
            state: watch::Sender::new(PageState::Queued),
            stream: Mutex::default(),
        }
    }

    /// A page read from disk; ready as soon as it exists.
    pub(crate) fn local(index: usize, name: impl Into<String>, stream: ImageStream) -> Self {
        Self {
            index,
            url: name.into(),
            image_url: OnceLock::new(),
            chapter_id: OnceLock::new(),
            local: true,
            state: watch::Sender::new(PageState::Ready),
            stream: Mutex::new(StreamSlot { stream: Some(stream), generation: 0 }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Source page locator, or the file/entry name for local pages.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.get().map(String::as_str)
    }

    pub fn chapter_id(&self) -> Option<i64> {
        self.chapter_id.get().copied()
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn state(&self) -> PageState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PageState> {
        self.state.subscribe()
    }

    pub fn stream(&self) -> Option<ImageStream> {
        self.lock_stream().stream.clone()
    }

    /// Read the page image without touching its state.
    ///
    /// Go through [`PageLoader::read_image`](crate::PageLoader::read_image)
    /// to have a failed read reflected in the page's state.
    pub async fn read_image(&self) -> Result<Vec<u8>> {
        let (stream, _) = self.ready_stream()?;
        stream.read().await
    }

    /// The accessor of a ready page, tagged with its generation.
    pub(crate) fn ready_stream(&self) -> Result<(ImageStream, u64)> {
        let slot = self.lock_stream();
        match &slot.stream {
            Some(stream) if self.state() == PageState::Ready => Ok((stream.clone(), slot.generation)),
            _ => exn::bail!(ErrorKind::NotReady(self.index)),
        }
    }

    /// Record that reading the accessor of `generation` failed, moving a
    /// `Ready` page to `next`. Moving to `Queued` also drops the accessor.
    ///
    /// Does nothing once the page has been given a newer accessor, so a late
    /// failure of stale bytes can't undo a fresh load.
    pub(crate) fn read_failed(&self, generation: u64, next: PageState) -> bool {
        let mut slot = self.lock_stream();
        if slot.generation != generation || self.state() != PageState::Ready {
            return false;
        }
        if !self.set_state(next) {
            return false;
        }
        if next == PageState::Queued {
            slot.stream = None;
        }
        true
    }

    /// Put an in-flight page back in the queue after its loader was recycled.
    pub(crate) fn requeue_cancelled(&self) -> bool {
        let requeued = self.state.send_if_modified(|current| {
            let in_flight = matches!(*current, PageState::ResolvingUrl | PageState::DownloadingImage);
            if in_flight {
                *current = PageState::Queued;
            }
            in_flight
        });
        if requeued {
            debug!(page = self.index, "in-flight page requeued after cancellation");
        }
        requeued
    }

    /// The persistable part of this page.
    pub fn to_page(&self) -> Page {
        Page { index: self.index, url: self.url.clone(), image_url: self.image_url.get().cloned() }
    }

    /// Apply a state transition, refusing (and logging) illegal ones.
    ///
    /// Returns whether the page is now in `next`.
    pub(crate) fn set_state(&self, next: PageState) -> bool {
        let local = self.local;
        let mut from = next;
        let changed = self.state.send_if_modified(|current| {
            from = *current;
            if *current == next || !current.can_become(next, local) {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(page = self.index, %from, to = %next, "page state");
        } else if from != next {
            warn!(page = self.index, %from, to = %next, "rejected page state transition");
        }
        from == next || changed
    }

    pub(crate) fn set_image_url(&self, image_url: String) {
        let _ = self.image_url.set(image_url);
    }

    pub(crate) fn set_stream(&self, stream: ImageStream) {
        let mut slot = self.lock_stream();
        slot.stream = Some(stream);
        slot.generation += 1;
    }

    pub(crate) fn attach_chapter(&self, chapter_id: i64) {
        let _ = self.chapter_id.set(chapter_id);
    }

    fn lock_stream(&self) -> MutexGuard<'_, StreamSlot> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for ReaderPage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ReaderPage")
            .field("index", &self.index)
            .field("url", &self.url)
            .field("state", &self.state())
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;
    use tankobon_storage::StorageBackend;
    use tankobon_storage::backend::MockBackend;

    use PageState::*;

    #[rstest]
    #[case(Queued, ResolvingUrl, true)]
    #[case(Queued, DownloadingImage, true)]
    #[case(Queued, Ready, true)]
    #[case(Queued, Error, true)]
    #[case(ResolvingUrl, DownloadingImage, true)]
    #[case(ResolvingUrl, Queued, false)]
    #[case(DownloadingImage, Ready, true)]
    #[case(DownloadingImage, Error, true)]
    #[case(DownloadingImage, ResolvingUrl, false)]
    #[case(DownloadingImage, Queued, false)]
    #[case(Ready, Queued, true)]
    #[case(Ready, Error, false)]
    #[case(Ready, DownloadingImage, false)]
    #[case(Error, Queued, true)]
    #[case(Error, Ready, false)]
    fn test_remote_transitions(#[case] from: PageState, #[case] to: PageState, #[case] allowed: bool) {
        assert_eq!(from.can_become(to, false), allowed);
    }

    #[rstest]
    #[case(Ready, Error, true)]
    #[case(Error, Ready, true)]
    #[case(Ready, Queued, false)]
    #[case(Error, Queued, false)]
    fn test_local_transitions(#[case] from: PageState, #[case] to: PageState, #[case] allowed: bool) {
        assert_eq!(from.can_become(to, true), allowed);
    }

    #[test]
    fn test_illegal_transition_is_not_applied() {
        let page = ReaderPage::remote(0, "/p/0", None);
        assert!(page.set_state(DownloadingImage));
        assert!(!page.set_state(ResolvingUrl));
        assert_eq!(page.state(), DownloadingImage);
        assert!(page.set_state(Ready));
        assert!(!page.set_state(Error));
        assert_eq!(page.state(), Ready);
    }

    #[test]
    fn test_subscribers_see_changes() {
        let page = ReaderPage::remote(0, "/p/0", None);
        let mut rx = page.subscribe();
        page.set_state(ResolvingUrl);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ResolvingUrl);
        // Same-state updates don't wake anyone.
        page.set_state(ResolvingUrl);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_image_url_is_immutable_once_set() {
        let page = ReaderPage::remote(3, "/p/3", None);
        assert_eq!(page.image_url(), None);
        page.set_image_url("https://i/3.png".to_string());
        page.set_image_url("https://i/other.png".to_string());
        assert_eq!(page.image_url(), Some("https://i/3.png"));
        page.attach_chapter(7);
        assert_eq!(page.chapter_id(), Some(7));
        assert_eq!(page.to_page(), Page::new(3, "/p/3").with_image_url("https://i/3.png"));
    }

    #[tokio::test]
    async fn test_read_image_requires_ready() {
        let page = ReaderPage::remote(1, "/p/1", None);
        let err = page.read_image().await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotReady(1));
        page.set_stream(ImageStream::memory(b"png".to_vec()));
        page.set_state(Ready);
        assert_eq!(page.read_image().await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_read_image_leaves_state_alone() {
        let backend = Arc::new(MockBackend::with_files([("ch/001.png", b"png".to_vec())]));
        let page = ReaderPage::local(0, "001.png", ImageStream::storage(backend.clone(), "ch/001.png"));
        assert_eq!(page.read_image().await.unwrap(), b"png");
        backend.delete(Path::new("ch/001.png")).await.unwrap();
        let err = page.read_image().await.unwrap_err();
        assert_eq!(*err, ErrorKind::Storage);
        assert_eq!(page.state(), Ready);
    }

    #[test]
    fn test_stale_read_failure_is_ignored() {
        let page = ReaderPage::remote(0, "/p/0", None);
        page.set_state(DownloadingImage);
        page.set_stream(ImageStream::memory(b"old".to_vec()));
        page.set_state(Ready);
        let (_, stale) = page.ready_stream().unwrap();

        assert!(page.read_failed(stale, Queued));
        assert!(page.stream().is_none());
        page.set_state(DownloadingImage);
        page.set_stream(ImageStream::memory(b"new".to_vec()));
        page.set_state(Ready);

        // The old accessor failing again must not undo the reload.
        assert!(!page.read_failed(stale, Queued));
        assert_eq!(page.state(), Ready);
        assert!(page.stream().is_some());
    }

    #[test]
    fn test_only_in_flight_pages_are_requeued() {
        let page = ReaderPage::remote(0, "/p/0", None);
        assert!(!page.requeue_cancelled());
        page.set_state(ResolvingUrl);
        assert!(!page.set_state(Queued));
        assert!(page.requeue_cancelled());
        assert_eq!(page.state(), Queued);
        page.set_state(Error);
        assert!(!page.requeue_cancelled());
        assert_eq!(page.state(), Error);
    }
}
