//! Configuration file support for Zici.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/zici/config.toml`.

use crate::{DiagnosticSettings, Error, LearningSettings, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub user: UserConfig,

    /// Settings given to learners who have no saved settings yet
    #[serde(default)]
    pub learning: LearningSettings,

    #[serde(default)]
    pub diagnostic: DiagnosticSettings,

    #[serde(default)]
    pub mastery: MasteryConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Character dataset; defaults to `<data_dir>/zici.csv`
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Local fallback copy of user data
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            catalog_path: None,
            cache_dir: default_cache_dir(),
        }
    }
}

impl DataConfig {
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("zici.csv"))
    }

    /// Authoritative user documents
    pub fn users_dir(&self) -> PathBuf {
        self.data_dir.join("users")
    }

    pub fn cache_users_dir(&self) -> PathBuf {
        self.cache_dir.join("users")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default = "default_user")]
    pub default_user: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            default_user: default_user(),
        }
    }
}

/// Mastery reporting options
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MasteryConfig {
    /// Report items that were only studied, never tested, as unstudied
    #[serde(default)]
    pub untested_is_unstudied: bool,
}

fn home_dir(fallback: &str) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(fallback)
}

// Default value functions
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| home_dir(".local/share"))
        .join("zici")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| home_dir(".cache"))
        .join("zici")
}

fn default_user() -> String {
    "guest".to_string()
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| home_dir(".config"))
            .join("zici")
            .join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
