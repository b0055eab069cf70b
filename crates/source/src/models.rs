use serde::{Deserialize, Serialize};

/// A manga as far as the reader cares: enough to locate its downloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manga {
    pub id: i64,
    pub title: String,
    /// Name of the primary source; downloads of every chapter, merged or
    /// not, live under this source's directory.
    pub source: String,
}

impl Manga {
    pub fn new(id: i64, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self { id, title: title.into(), source: source.into() }
    }
}

/// A chapter of a manga.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub manga_id: i64,
    /// Source-relative locator.
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub scanlator: Option<String>,
    /// Zero-based index of the last page the user looked at.
    #[serde(default)]
    pub last_page_read: usize,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub pages_left: usize,
    /// Name of the merged source this chapter comes from, if not the primary.
    #[serde(default)]
    pub merged_source: Option<String>,
}

impl Chapter {
    pub fn new(id: i64, manga_id: i64, url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            manga_id,
            url: url.into(),
            name: name.into(),
            scanlator: None,
            last_page_read: 0,
            read: false,
            pages_left: 0,
            merged_source: None,
        }
    }

    pub fn with_scanlator(mut self, scanlator: impl Into<String>) -> Self {
        self.scanlator = Some(scanlator.into());
        self
    }

    pub fn with_merged_source(mut self, source: impl Into<String>) -> Self {
        self.merged_source = Some(source.into());
        self
    }

    pub fn with_progress(mut self, last_page_read: usize, read: bool) -> Self {
        self.last_page_read = last_page_read;
        self.read = read;
        self
    }

    /// Key identifying this chapter in caches shared across manga.
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.manga_id, self.url)
    }
}

/// One page of a chapter as a source describes it.
///
/// This is also the shape persisted in the chapter cache's page-list slot,
/// so it deliberately carries no runtime state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "imageUrl", alias = "image_url")]
    pub image_url: Option<String>,
}

impl Page {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self { index, url: url.into(), image_url: None }
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}
