//! In-memory source for testing.

use crate::error::{ErrorKind, Result};
use crate::Source;
use crate::models::{Chapter, Page};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, watch};
use tracing::trace;

#[derive(Default)]
struct State {
    chapters: HashMap<String, Vec<Page>>,
    image_urls: HashMap<String, String>,
    images: HashMap<String, Vec<u8>>,
    failures: HashMap<String, ErrorKind>,
    fetched: Vec<String>,
    page_list_calls: usize,
    image_url_calls: usize,
}

/// Scriptable in-memory [`Source`].
///
/// Chapters are keyed by their URL, image URLs by page URL and image bytes by
/// image URL. Failures can be injected for any of those keys. Image fetches
/// are logged in the order they start, and can be held back with a gate to
/// observe what a loader queues up while a fetch is in flight.
pub struct MockSource {
    name: String,
    state: Mutex<State>,
    gate: Option<Semaphore>,
    started: watch::Sender<usize>,
}

impl MockSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: Mutex::default(), gate: None, started: watch::Sender::new(0) }
    }

    /// Register a chapter with `count` pages.
    ///
    /// Pages get the URL `{chapter_url}/{i}`, their image URLs are only known
    /// through [`get_image_url`](Source::get_image_url) and each image is a
    /// small PNG-signed blob ending in the page number.
    pub fn with_generated_chapter(self, chapter_url: &str, count: usize) -> Self {
        let pages: Vec<Page> = (0..count).map(|i| Page::new(i, format!("{chapter_url}/{i}"))).collect();
        {
            let mut state = self.lock();
            for page in &pages {
                let image_url = Self::generated_image_url(&page.url);
                let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
                data.extend_from_slice(page.index.to_string().as_bytes());
                state.images.insert(image_url.clone(), data);
                state.image_urls.insert(page.url.clone(), image_url);
            }
        }
        self.with_chapter(chapter_url, pages)
    }

    /// Register a chapter with an explicit page list.
    pub fn with_chapter(self, chapter_url: &str, pages: impl IntoIterator<Item = Page>) -> Self {
        self.lock().chapters.insert(chapter_url.to_string(), pages.into_iter().collect());
        self
    }

    pub fn with_image(self, image_url: &str, data: impl Into<Vec<u8>>) -> Self {
        self.lock().images.insert(image_url.to_string(), data.into());
        self
    }

    pub fn with_image_url(self, page_url: &str, image_url: &str) -> Self {
        self.lock().image_urls.insert(page_url.to_string(), image_url.to_string());
        self
    }

    /// Hold every image fetch until [`release`](Self::release) lets it through.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Let `n` more gated image fetches complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Make every request for `key` (chapter URL, page URL or image URL) fail.
    pub fn fail(&self, key: &str, kind: ErrorKind) {
        self.lock().failures.insert(key.to_string(), kind);
    }

    pub fn heal(&self, key: &str) {
        self.lock().failures.remove(key);
    }

    /// Image URL a generated page resolves to.
    pub fn generated_image_url(page_url: &str) -> String {
        format!("https://img.example{page_url}.png")
    }

    /// Image URLs in the order their fetches started.
    pub fn fetched(&self) -> Vec<String> {
        self.lock().fetched.clone()
    }

    pub fn fetch_count(&self, image_url: &str) -> usize {
        self.lock().fetched.iter().filter(|url| *url == image_url).count()
    }

    pub fn page_list_calls(&self) -> usize {
        self.lock().page_list_calls
    }

    pub fn image_url_calls(&self) -> usize {
        self.lock().image_url_calls
    }

    /// Wait until at least `n` image fetches have started.
    pub async fn wait_for_fetches(&self, n: usize) {
        let mut rx = self.started.subscribe();
        // The sender lives as long as `self`, so this can't fail.
        let _ = rx.wait_for(|started| *started >= n).await;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &State, key: &str) -> Result<()> {
        match state.failures.get(key) {
            Some(kind) => exn::bail!(kind.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_page_list(&self, chapter: &Chapter) -> Result<Vec<Page>> {
        let mut state = self.lock();
        state.page_list_calls += 1;
        Self::check(&state, &chapter.url)?;
        match state.chapters.get(&chapter.url) {
            Some(pages) => Ok(pages.clone()),
            None => exn::bail!(ErrorKind::NotFound(chapter.url.clone())),
        }
    }

    async fn get_image_url(&self, page: &Page) -> Result<String> {
        let mut state = self.lock();
        state.image_url_calls += 1;
        Self::check(&state, &page.url)?;
        match state.image_urls.get(&page.url) {
            Some(url) => Ok(url.clone()),
            None => exn::bail!(ErrorKind::NotFound(page.url.clone())),
        }
    }

    async fn get_image(&self, page: &Page) -> Result<Vec<u8>> {
        let Some(image_url) = page.image_url.clone() else {
            exn::bail!(ErrorKind::MissingImageUrl(page.index));
        };
        trace!(source = %self.name, %image_url, "mock image fetch");
        self.lock().fetched.push(image_url.clone());
        self.started.send_modify(|started| *started += 1);
        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => exn::bail!(ErrorKind::Cancelled),
            }
        }
        let state = self.lock();
        Self::check(&state, &image_url)?;
        match state.images.get(&image_url) {
            Some(data) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::NotFound(image_url)),
        }
    }
}
