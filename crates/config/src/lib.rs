//! Reader settings.
//!
//! Settings are layered with [figment]: built-in defaults, then an optional
//! config file (`config.toml`, `config.yaml` or `config.json` in the user's
//! config directory, or one explicit file), then `TANKOBON_`-prefixed
//! environment variables. The result is validated once and then shared
//! through a [`SettingsHandle`] so running loaders see changes immediately.

pub mod error;
mod handle;
mod load;
mod settings;

pub use crate::handle::SettingsHandle;
pub use crate::load::ConfigLoader;
pub use crate::settings::{MAX_PRELOAD_PAGE_AMOUNT, ReaderSettings};
