//! Reading downloaded chapters.
//!
//! A downloaded chapter is either a zip-like archive (`.cbz`/`.zip`) or a
//! directory of loose image files. This crate handles the parts that don't
//! depend on where the bytes live:
//!
//! - **Format detection** for archives ([`ArchiveFormat`]) and page images
//!   ([`ImageType`]) from file names or magic bytes
//! - **Page ordering** with a case-insensitive natural comparison
//!   ([`compare_natural`]) so `page2` sorts before `page10`
//! - **Archive access** through [`Archive`], which lists image entries in
//!   reading order and reads individual entries on demand
//!
//! Everything here is synchronous; callers on an async runtime should wrap
//! archive I/O in `spawn_blocking`.

mod archive;
pub mod error;
mod format;
mod natural;

pub use crate::archive::Archive;
pub use crate::format::{ArchiveFormat, ImageType};
pub use crate::natural::compare_natural;
