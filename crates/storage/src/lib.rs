//! Byte storage for the reader.
//!
//! Downloaded chapters and cached page images both end up as files under
//! some root: the downloads directory and the chapter cache directory. Both
//! go through [`StorageBackend`], so tests can swap in the in-memory
//! [`MockBackend`](backend::MockBackend) and restricted storage can refuse
//! to hand out filesystem paths.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::{DirEntry, EntryKind};
pub use crate::path::{sanitize_component, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
