use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Config structs for config.toml
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Paths {
    pub download_directory: String,
    pub playlist_file: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Pools {
    pub max_concurrent_tasks: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Site {
    pub base_url: String,
    pub link_selector: String,
    pub link_attribute: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Timeouts {
    pub page_load_secs: u64,
    pub selector_wait_secs: u64,
    pub fetch_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Progress {
    pub removal_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Browser {
    pub headless: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_executable: Option<String>,
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub paths: Paths,
    pub pools: Pools,
    pub site: Site,
    pub timeouts: Timeouts,
    pub progress: Progress,
    pub logging: Logging,
    pub browser: Browser,
}

// Default implementation for AppConfig
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                download_directory: "./music".to_string(),
                playlist_file: "playlist.toml".to_string(),
                log_directory: "./logs".to_string(),
            },
            pools: Pools {
                max_concurrent_tasks: 5,
            },
            site: Site {
                base_url: "https://slider.kz".to_string(),
                link_selector: ".sm2_link".to_string(),
                link_attribute: "href".to_string(),
            },
            timeouts: Timeouts {
                page_load_secs: 30,
                selector_wait_secs: 30,
                fetch_secs: 300,
            },
            progress: Progress {
                removal_delay_ms: 1000,
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "line".to_string(),
                log_to_terminal: false,
                log_to_file: true,
            },
            browser: Browser {
                headless: true,
                chrome_executable: None,
                chrome_args: Vec::new(),
            },
        }
    }
}

impl AppConfig {
    /// Checks the values that would make a run impossible.
    pub fn validate(&self) -> ConfigResult<()> {
        url::Url::parse(&self.site.base_url)
            .map_err(|e| ConfigError::Invalid(format!("site.base_url: {}", e)))?;
        if self.site.link_selector.trim().is_empty() {
            return Err(ConfigError::Invalid("site.link_selector is empty".to_string()));
        }
        Ok(())
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.page_load_secs)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.selector_wait_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.fetch_secs)
    }

    pub fn removal_delay(&self) -> Duration {
        Duration::from_millis(self.progress.removal_delay_ms)
    }
}

/// Loads `config.toml`, writing the defaults when it is missing.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        // Create the directory if it doesn't exist
        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    // Load app config from config.toml
    pub fn load(&self) -> ConfigResult<AppConfig> {
        if !self.config_path.exists() {
            warn!("Config file not found: {}", self.config_path.display());
            let default_config = AppConfig::default();
            self.save(&default_config)?;
            info!("Created {} with default values", self.config_path.display());
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)?;
        match toml::from_str::<AppConfig>(&content) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                error!("Failed to parse config.toml: {}", e);
                info!("Backing up old config and creating new one with default values");

                // Backup the old config file
                if let Err(backup_err) =
                    fs::rename(&self.config_path, self.config_path.with_extension("toml.backup"))
                {
                    warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                self.save(&default_config)?;
                Ok(default_config)
            }
        }
    }

    // Save app config to file
    pub fn save(&self, config: &AppConfig) -> ConfigResult<()> {
        let toml_string =
            toml::to_string_pretty(config).map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(&self.config_path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_writes_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();

        let config = manager.load().unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());

        // Second load reads the file that was just written
        let reloaded = manager.load().unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_defaults_match_reference_behaviour() {
        let config = AppConfig::default();
        assert_eq!(config.pools.max_concurrent_tasks, 5);
        assert_eq!(config.site.base_url, "https://slider.kz");
        assert_eq!(config.site.link_selector, ".sm2_link");
        assert_eq!(config.removal_delay(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_corrupt_config_is_backed_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "this is = = not toml").unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();

        let config = manager.load().unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(dir.path().join("config.toml.backup").exists());
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();
        let mut config = AppConfig::default();
        config.site.base_url = "slider kz".to_string();
        manager.save(&config).unwrap();

        assert!(matches!(manager.load(), Err(ConfigError::Invalid(_))));
    }
}
