use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Path relative to the backend root.
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Size in bytes; zero for directories.
    pub size: u64,
}

impl DirEntry {
    pub fn file(path: impl Into<PathBuf>, size: u64) -> Self {
        Self { path: path.into(), kind: EntryKind::File, size }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), kind: EntryKind::Directory, size: 0 }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Final path component, if it is valid UTF-8.
    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// Dotfiles, which downloaders and archivers leave behind.
    pub fn is_hidden(&self) -> bool {
        self.name().is_some_and(|name| name.starts_with('.'))
    }
}
