use crate::error::{ErrorKind, Result};
use crate::format::{ImageType, MAGIC_LEN};
use crate::natural::compare_natural;
use exn::ResultExt;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, trace, warn};
use zip::ZipArchive;
use zip::result::{ZipError, ZipResult};

/// An opened chapter archive.
///
/// The handle is cheap to clone; clones share one underlying file, and
/// reads are serialised through a mutex because zip access needs `&mut`.
/// All methods block, so call them from `spawn_blocking` on a runtime.
#[derive(Clone)]
pub struct Archive {
    inner: Arc<Mutex<ZipArchive<File>>>,
}

impl Debug for Archive {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Archive").field("entries", &self.lock().len()).finish()
    }
}

impl Archive {
    /// Open the archive at `path`.
    #[instrument(level = "debug")]
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).or_raise(|| ErrorKind::Io)?;
        Self::from_file(file)
    }

    /// Wrap an already opened file, such as an anonymous temporary copy.
    pub fn from_file(file: File) -> Result<Self> {
        let archive = raise_zip(ZipArchive::new(file), None)?;
        debug!(entries = archive.len(), "opened archive");
        Ok(Self { inner: Arc::new(Mutex::new(archive)) })
    }

    /// Names of all page images, in reading order.
    ///
    /// Directories and metadata files are skipped. An entry counts as an
    /// image if its extension says so or, failing that, if its first bytes
    /// match a known image signature.
    ///
    /// Names come from the central directory, so an entry whose own header
    /// is damaged is still listed and only fails once it is read.
    #[instrument(level = "debug", skip(self))]
    pub fn image_entries(&self) -> Result<Vec<String>> {
        let mut archive = self.lock();
        let mut names = Vec::new();
        for index in 0..archive.len() {
            let Some(name) = archive.name_for_index(index).map(str::to_string) else {
                continue;
            };
            if name.ends_with('/') || is_hidden(&name) {
                continue;
            }
            if ImageType::from_path(&name).is_some() {
                names.push(name);
                continue;
            }
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(entry = %name, error = %err, "skipping unreadable archive entry");
                    continue;
                },
            };
            let mut magic = Vec::with_capacity(MAGIC_LEN);
            // An unreadable head just means the entry isn't treated as a page.
            if (&mut entry).take(MAGIC_LEN as u64).read_to_end(&mut magic).is_ok()
                && ImageType::from_magic_bytes(&magic).is_some()
            {
                trace!(entry = %name, "detected image by signature");
                names.push(name);
            }
        }
        names.sort_by(|a, b| compare_natural(a, b));
        debug!(pages = names.len(), "listed image entries");
        Ok(names)
    }

    /// Read the full, decompressed contents of one entry.
    #[instrument(level = "debug", skip(self))]
    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        let mut archive = self.lock();
        let mut entry = raise_zip(archive.by_name(name), Some(name))?;
        let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
        entry.read_to_end(&mut data).or_raise(|| ErrorKind::CorruptEntry(name.to_string()))?;
        Ok(data)
    }

    /// Number of entries in the archive, including non-images.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, ZipArchive<File>> {
        // A panic mid-read leaves nothing half-written, so keep going.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || Path::new(name).file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.'))
}

fn raise_zip<T>(result: ZipResult<T>, entry: Option<&str>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let kind = match (&err, entry) {
                (ZipError::FileNotFound, Some(name)) => ErrorKind::EntryNotFound(name.to_string()),
                (ZipError::Io(_), _) => ErrorKind::Io,
                (_, Some(name)) => ErrorKind::CorruptEntry(name.to_string()),
                (_, None) => ErrorKind::InvalidArchive,
            };
            Err(err).or_raise(|| kind)
        }
    }
}
