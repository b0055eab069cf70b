use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Upper bound for [`ReaderSettings::preload_page_amount`].
pub const MAX_PRELOAD_PAGE_AMOUNT: usize = 30;
const DEFAULT_PRELOAD_PAGE_AMOUNT: usize = 6;
const DEFAULT_CHAPTER_CACHE_BASE_MB: u64 = 50;
const CACHE_GROWTH_EXPONENT: f64 = 0.6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    /// How many pages after a requested page are fetched ahead of time.
    pub preload_page_amount: usize,
    /// Where the chapter cache keeps its blobs and journal.
    pub cache_dir: PathBuf,
    /// Root of the `<source>/<manga>/<chapter>` download tree.
    pub downloads_dir: PathBuf,
    /// Chapter cache size, in MiB, for a preload amount of one page.
    pub chapter_cache_base_mb: u64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        let (cache_dir, downloads_dir) = match ProjectDirs::from("", "", "tankobon") {
            Some(dirs) => (dirs.cache_dir().join("chapter_disk_cache"), dirs.data_dir().join("downloads")),
            // No home directory (containers, service accounts).
            None => {
                let base = std::env::temp_dir().join("tankobon");
                (base.join("chapter_disk_cache"), base.join("downloads"))
            },
        };
        Self {
            preload_page_amount: DEFAULT_PRELOAD_PAGE_AMOUNT,
            cache_dir,
            downloads_dir,
            chapter_cache_base_mb: DEFAULT_CHAPTER_CACHE_BASE_MB,
        }
    }
}

impl ReaderSettings {
    pub fn validate(&self) -> Result<()> {
        if self.preload_page_amount > MAX_PRELOAD_PAGE_AMOUNT {
            exn::bail!(ErrorKind::Invalid(
                "preload_page_amount",
                format!("{} exceeds the maximum of {MAX_PRELOAD_PAGE_AMOUNT}", self.preload_page_amount),
            ));
        }
        if self.chapter_cache_base_mb == 0 {
            exn::bail!(ErrorKind::Invalid("chapter_cache_base_mb", "must be at least 1".to_string()));
        }
        if self.cache_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("cache_dir", "must not be empty".to_string()));
        }
        if self.downloads_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("downloads_dir", "must not be empty".to_string()));
        }
        Ok(())
    }

    /// Byte capacity of the chapter cache.
    ///
    /// Grows sub-linearly with the preload amount: 4 pages gives about
    /// 115 MiB, 6 about 147 MiB and 20 about 302 MiB with the default base.
    pub fn chapter_cache_capacity(&self) -> u64 {
        let base = self.chapter_cache_base_mb.saturating_mul(1024 * 1024) as f64;
        let factor = (self.preload_page_amount.max(1) as f64).powf(CACHE_GROWTH_EXPONENT);
        (base * factor).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let settings = ReaderSettings::default();
        assert_eq!(settings.preload_page_amount, 6);
        assert_eq!(settings.chapter_cache_base_mb, 50);
        settings.validate().unwrap();
    }

    #[rstest]
    #[case(1, 50)]
    #[case(4, 114)]
    #[case(6, 146)]
    #[case(20, 301)]
    fn test_chapter_cache_capacity(#[case] preload: usize, #[case] expected_mib: u64) {
        let settings = ReaderSettings { preload_page_amount: preload, ..Default::default() };
        assert_eq!(settings.chapter_cache_capacity() / (1024 * 1024), expected_mib);
    }

    #[test]
    fn test_zero_preload_still_has_a_cache() {
        let settings = ReaderSettings { preload_page_amount: 0, ..Default::default() };
        settings.validate().unwrap();
        assert_eq!(settings.chapter_cache_capacity(), 50 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let settings = ReaderSettings { preload_page_amount: 31, ..Default::default() };
        let err = settings.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid("preload_page_amount", _)));

        let settings = ReaderSettings { chapter_cache_base_mb: 0, ..Default::default() };
        assert!(settings.validate().is_err());
    }
}
