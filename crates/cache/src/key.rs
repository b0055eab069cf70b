use std::path::PathBuf;
use tankobon_source::Chapter;

const IMAGE_DIR: &str = "images";
const PAGES_DIR: &str = "pages";

/// Disk-safe key for an arbitrary string (URLs can be any length and contain
/// anything).
pub(crate) fn hash_key(value: &str) -> String {
    blake3::hash(value.as_bytes()).to_hex().to_string()
}

pub(crate) fn image_key(image_url: &str) -> String {
    hash_key(image_url)
}

pub(crate) fn page_list_key(chapter: &Chapter) -> String {
    hash_key(&chapter.cache_key())
}

pub(crate) fn image_path(key: &str) -> PathBuf {
    PathBuf::from(IMAGE_DIR).join(key)
}

pub(crate) fn page_list_path(key: &str) -> PathBuf {
    PathBuf::from(PAGES_DIR).join(format!("{key}.json"))
}
