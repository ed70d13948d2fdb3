use std::path::{Path, PathBuf};

use memovault_common::{Error, Result};
use tracing::info;

use crate::model::AppConfig;

const CONFIG_FILES: [(&str, ConfigFormat); 2] = [
    ("config.yml", ConfigFormat::Yaml),
    ("config.toml", ConfigFormat::Toml),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Toml,
}

/// Resolves the config directory and the store paths derived from it.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::with_dir(Self::default_config_dir())
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// `$XDG_CONFIG_HOME/memovault`, or `~/.memovault` where there is no
    /// platform config dir.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("memovault"))
            .or_else(|| dirs::home_dir().map(|home| home.join(".memovault")))
            .unwrap_or_else(|| PathBuf::from(".memovault"))
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// First config file present, YAML before TOML.
    fn config_file(&self) -> Option<(PathBuf, ConfigFormat)> {
        CONFIG_FILES
            .iter()
            .map(|(name, format)| (self.config_dir.join(name), *format))
            .find(|(path, _)| path.is_file())
    }

    pub fn config_file_exists(&self) -> bool {
        self.config_file().is_some()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let Some((path, format)) = self.config_file() else {
            info!(
                "no config file in {}, using defaults",
                self.config_dir.display()
            );
            return Ok(AppConfig::default());
        };

        info!("loading config from {}", path.display());
        let contents = std::fs::read_to_string(&path)?;
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}"))),
            ConfigFormat::Toml => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}"))),
        }
    }

    /// Directory holding the store, honoring `storage.data_dir` when set.
    pub fn data_dir(&self, config: &AppConfig) -> PathBuf {
        config
            .storage
            .data_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("data"))
    }

    pub fn database_path(&self, config: &AppConfig) -> PathBuf {
        self.data_dir(config).join(&config.storage.database_file)
    }

    pub fn ensure_dirs(&self, config: &AppConfig) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(self.data_dir(config))?;
        Ok(())
    }
}
