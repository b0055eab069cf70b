//! Path validation and sanitization.
//!
//! Storage paths are always relative to a backend root. Anything that would
//! escape the root is rejected before it reaches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Longest file name (in bytes) produced by [`sanitize_component`].
const MAX_COMPONENT_BYTES: usize = 240;

/// Validates a storage path and returns its normalized form.
///
/// `.` components and repeated separators are dropped and `..` is resolved
/// lexically, provided it never climbs above the root. Empty results, null
/// bytes and platform prefixes are [`InvalidPath`](ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tankobon_storage::validate_path;
///
/// assert!(validate_path("MangaDex/Berserk/Ch. 1.cbz").is_ok());
/// assert!(validate_path("../outside.cbz").is_err());
/// assert_eq!(
///     validate_path("a/./b//../c.png").unwrap(),
///     Path::new("a/c.png"),
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || exn::Exn::from(ErrorKind::InvalidPath(original.to_path_buf()));
    let mut normalized: Vec<&std::ffi::OsStr> = Vec::new();
    for component in original.components() {
        match component {
            // Null bytes survive `Path::components()` on Unix but truncate
            // paths in C-based syscalls.
            Component::Normal(part) if part.as_encoded_bytes().contains(&0) => return Err(invalid()),
            Component::Normal(part) => normalized.push(part),
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => return Err(invalid()),
            Component::ParentDir => {
                normalized.pop().ok_or_else(invalid)?;
            },
        }
    }
    if normalized.is_empty() {
        return Err(invalid());
    }
    Ok(normalized.into_iter().collect())
}

/// Turns an arbitrary display name (manga title, chapter name, source name)
/// into a single safe path component.
///
/// Separators, reserved characters and control characters become `_`,
/// surrounding whitespace and trailing dots are trimmed, and the result is
/// cut to a filesystem-friendly length on a character boundary.
///
/// ```
/// use tankobon_storage::sanitize_component;
///
/// assert_eq!(sanitize_component("Vol.1 Ch.2: Start/End?"), "Vol.1 Ch.2_ Start_End_");
/// assert_eq!(sanitize_component("   "), "(invalid)");
/// ```
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches('.');
    let mut end = trimmed.len().min(MAX_COMPONENT_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    match &trimmed[..end] {
        "" => "(invalid)".to_string(),
        valid => valid.to_string(),
    }
}
