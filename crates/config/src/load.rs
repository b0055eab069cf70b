use crate::error::{ErrorKind, Result};
use crate::settings::ReaderSettings;
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const ENV_PREFIX: &str = "TANKOBON_";
const CONFIG_STEM: &str = "config";

/// Builds [`ReaderSettings`] from defaults, files and the environment.
///
/// ```no_run
/// use tankobon_config::ConfigLoader;
///
/// let settings = ConfigLoader::new().load().unwrap();
/// println!("preloading {} pages", settings.preload_page_amount);
/// ```
#[derive(Clone, Debug)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { file: None, env: true }
    }

    /// Read this file instead of searching the user config directory.
    ///
    /// Unlike the searched locations, an explicit file must exist.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Skip `TANKOBON_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    #[instrument(level = "debug", skip(self), fields(file = ?self.file))]
    pub fn load(&self) -> Result<ReaderSettings> {
        let mut figment = Figment::from(Serialized::defaults(ReaderSettings::default()));
        figment = match &self.file {
            Some(path) => Self::merge_file(figment, path)?,
            None => match ProjectDirs::from("", "", "tankobon") {
                Some(dirs) => Self::merge_searched(figment, dirs.config_dir()),
                None => figment,
            },
        };
        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX));
        }
        let settings: ReaderSettings = figment.extract().or_raise(|| ErrorKind::Parse)?;
        settings.validate()?;
        debug!(preload = settings.preload_page_amount, cache_dir = %settings.cache_dir.display(), "loaded settings");
        Ok(settings)
    }

    fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }

    /// Later files win when more than one format is present.
    fn merge_searched(figment: Figment, dir: &Path) -> Figment {
        let stem = dir.join(CONFIG_STEM);
        figment
            .merge(Toml::file(stem.with_extension("toml")))
            .merge(Yaml::file(stem.with_extension("yaml")))
            .merge(Json::file(stem.with_extension("json")))
    }
}
