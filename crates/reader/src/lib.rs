//! Loading the pages of a manga chapter for display.
//!
//! A [`ReaderChapter`] is loaded by a [`ChapterLoader`], which picks a
//! [`PageLoader`] for it:
//!
//! - **Downloaded chapters** ([`DownloadPageLoader`]) are read from an
//!   archive or a directory of images. Every page is ready immediately.
//! - **Everything else** ([`HttpPageLoader`]) goes through the chapter cache
//!   to the chapter's source. One background task per loader fetches pages
//!   in priority order: retries, then requested pages, then preloads.
//!
//! Pages expose their [`PageState`] through a watch channel so a viewer can
//! render progress without polling, and hand out an [`ImageStream`] once
//! ready.

mod chapter;
mod downloads;
pub mod error;
mod loader;
mod page;
mod queue;
#[cfg(test)]
mod testing;

pub use crate::chapter::{ChapterState, Pages, ReaderChapter};
pub use crate::downloads::{
    ChapterArchive, DownloadProvider, DownloadProviderHandle, LocalPage, StorageDownloadProvider,
};
pub use crate::loader::{ChapterLoader, DownloadPageLoader, HttpPageLoader, PageLoader, PageLoaderHandle};
pub use crate::page::{ImageStream, PageState, ReaderPage};
pub use crate::queue::{PRIORITY_PRELOAD, PRIORITY_REQUEST, PRIORITY_RETRY};
