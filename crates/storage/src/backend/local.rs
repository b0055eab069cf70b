//! Files under a directory on the local filesystem.

use crate::backend::DirEntryStream;
use crate::error::{ErrorKind, Result};
use crate::models::DirEntry;
use crate::{StorageBackend, validate_path};
use async_stream::stream;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace};

/// Storage rooted at a local directory, accessed through `tokio::fs`.
///
/// ```no_run
/// use tankobon_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let downloads = LocalBackend::new("downloads", "/home/reader/Manga")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}

impl LocalBackend {
    /// The root must be absolute. It is created if missing.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || root.is_file() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        // Runs once per backend; a blocking call is fine here.
        std::fs::create_dir_all(&root).map_err(|err| ErrorKind::from_io(err, &root))?;
        let name = name.into();
        debug!(backend = %name, root = %root.display(), "local storage ready");
        Ok(Self { name, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<(PathBuf, PathBuf)> {
        let relative = validate_path(path)?;
        Ok((self.root.join(&relative), relative))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_dir_stream<'a>(&'a self, dir: &'a Path) -> DirEntryStream<'a> {
        let (absolute, relative) = match self.resolve(dir) {
            Ok(resolved) => resolved,
            Err(err) => return Box::pin(futures::stream::once(async { Err(err) })),
        };
        Box::pin(stream! {
            let mut children = match fs::read_dir(&absolute).await {
                Ok(children) => children,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
                Err(err) => {
                    yield Err(exn::Exn::from(ErrorKind::from_io(err, &relative)));
                    return;
                },
            };
            loop {
                let child = match children.next_entry().await {
                    Ok(Some(child)) => child,
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::from_io(err, &relative)));
                        break;
                    },
                };
                let path = relative.join(child.file_name());
                // Follows symlinks; dangling ones are skipped.
                let Ok(metadata) = fs::metadata(child.path()).await else {
                    trace!(path = %path.display(), "skipping unreadable entry");
                    continue;
                };
                if metadata.is_dir() {
                    yield Ok(DirEntry::directory(path));
                } else if metadata.is_file() {
                    yield Ok(DirEntry::file(path, metadata.len()));
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let (absolute, relative) = self.resolve(path)?;
        Ok(fs::try_exists(&absolute).await.map_err(|err| ErrorKind::from_io(err, &relative))?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let (absolute, relative) = self.resolve(path)?;
        Ok(fs::read(&absolute).await.map_err(|err| ErrorKind::from_io(err, &relative))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let (absolute, relative) = self.resolve(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|err| ErrorKind::from_io(err, &relative))?;
        }
        Ok(fs::write(&absolute, data).await.map_err(|err| ErrorKind::from_io(err, &relative))?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let (absolute, relative) = self.resolve(path)?;
        Ok(fs::remove_file(&absolute).await.map_err(|err| ErrorKind::from_io(err, &relative))?)
    }

    fn local_path(&self, path: &Path) -> Option<PathBuf> {
        self.resolve(path).ok().map(|(absolute, _)| absolute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryKind;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("downloads", dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_root_must_be_absolute() {
        assert!(LocalBackend::new("downloads", "Manga").is_err());
    }

    #[test]
    fn test_missing_root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("reader/downloads");
        let backend = LocalBackend::new("downloads", &root).unwrap();
        assert_eq!(backend.root(), root);
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_round_trip_and_delete() {
        let (_dir, backend) = backend();
        let page = Path::new("MangaDex/Berserk/Ch. 1/001.png");
        backend.write(page, b"png").await.unwrap();
        assert!(backend.exists(Path::new("MangaDex/Berserk/Ch. 1")).await.unwrap());
        assert_eq!(backend.read(page).await.unwrap(), b"png");

        backend.delete(page).await.unwrap();
        assert!(!backend.exists(page).await.unwrap());
        let err = backend.read(page).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = backend.delete(page).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_dir_lists_direct_children() {
        let (_dir, backend) = backend();
        backend.write(Path::new("Berserk/Ch. 1/001.png"), b"a").await.unwrap();
        backend.write(Path::new("Berserk/Ch. 1/002.png"), b"bb").await.unwrap();
        backend.write(Path::new("Berserk/Ch. 1/extras/003.png"), b"c").await.unwrap();
        backend.write(Path::new("Berserk/Ch. 10/001.png"), b"d").await.unwrap();

        let mut entries = backend.read_dir(Path::new("Berserk/Ch. 1")).await.unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            entries,
            [
                DirEntry::file("Berserk/Ch. 1/001.png", 1),
                DirEntry::file("Berserk/Ch. 1/002.png", 2),
                DirEntry::directory("Berserk/Ch. 1/extras"),
            ]
        );
        assert_eq!(entries[2].kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_read_dir_of_missing_directory_is_empty() {
        let (_dir, backend) = backend();
        assert!(backend.read_dir(Path::new("Berserk")).await.unwrap().is_empty());
    }

    #[test]
    fn test_local_path_stays_inside_root() {
        let (dir, backend) = backend();
        assert_eq!(backend.local_path(Path::new("a/b.cbz")), Some(dir.path().join("a/b.cbz")));
        assert_eq!(backend.local_path(Path::new("../b.cbz")), None);
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_root() {
        let (_dir, backend) = backend();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("a/../../escape"), b"x").await.is_err());
        assert!(backend.read_dir(Path::new("..")).await.is_err());
    }
}
