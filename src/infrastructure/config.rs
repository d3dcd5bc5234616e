//! Configuration loading with hierarchical merging.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::core::{EngineConfig, EngineOptions, EngineTimings};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid refresh interval: {0}. Must be at least 2 seconds")]
    InvalidRefreshInterval(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid store backend: {0}. Must be one of: memory, sqlite")]
    InvalidStoreBackend(String),

    #[error("Invalid cluster backend: {0}. Must be one of: docker, mock")]
    InvalidClusterBackend(String),

    #[error("Store path cannot be empty")]
    EmptyStorePath,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Seconds between refresh waves.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub maintenance: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            read_only: false,
            maintenance: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// `sqlite` or `memory`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// `docker` or `mock`.
    #[serde(default = "default_cluster_backend")]
    pub backend: String,
    #[serde(default = "default_cluster_endpoint")]
    pub endpoint: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            backend: default_cluster_backend(),
            endpoint: default_cluster_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub logging: LogSettings,
}

impl Settings {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            config: EngineConfig {
                read_only: self.engine.read_only,
                maintenance: self.engine.maintenance,
            },
            timings: EngineTimings {
                refresh_interval: Duration::from_secs(self.engine.refresh_interval_secs),
                ..EngineTimings::default()
            },
        }
    }
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_store_backend() -> String {
    "sqlite".to_string()
}

fn default_store_path() -> String {
    ".stevedore/store.db".to_string()
}

fn default_cluster_backend() -> String {
    "docker".to_string()
}

fn default_cluster_endpoint() -> String {
    "http://127.0.0.1:2375".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration loader with hierarchical merging
pub struct SettingsLoader;

impl SettingsLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. /etc/stevedore/config.yaml (host config)
    /// 3. stevedore.yaml (working-directory overrides)
    /// 4. Environment variables (STEVEDORE_* prefix, highest priority)
    pub fn load() -> Result<Settings> {
        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Yaml::file("/etc/stevedore/config.yaml"))
            .merge(Yaml::file("stevedore.yaml"))
            .merge(Env::prefixed("STEVEDORE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;
        Self::validate(&settings)?;
        Ok(settings)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Settings> {
        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;
        Self::validate(&settings)?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(settings: &Settings) -> Result<(), ConfigError> {
        if settings.engine.refresh_interval_secs < 2 {
            return Err(ConfigError::InvalidRefreshInterval(
                settings.engine.refresh_interval_secs,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&settings.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(settings.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&settings.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(settings.logging.format.clone()));
        }

        if !["memory", "sqlite"].contains(&settings.store.backend.as_str()) {
            return Err(ConfigError::InvalidStoreBackend(settings.store.backend.clone()));
        }

        if settings.store.backend == "sqlite" && settings.store.path.is_empty() {
            return Err(ConfigError::EmptyStorePath);
        }

        if !["docker", "mock"].contains(&settings.cluster.backend.as_str()) {
            return Err(ConfigError::InvalidClusterBackend(
                settings.cluster.backend.clone(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.engine.refresh_interval_secs, 60);
        assert_eq!(settings.store.backend, "sqlite");
        assert_eq!(settings.logging.level, "info");
        SettingsLoader::validate(&settings).expect("default settings should be valid");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let settings = Settings {
            engine: EngineSettings {
                refresh_interval_secs: 1,
                ..EngineSettings::default()
            },
            ..Settings::default()
        };
        assert!(matches!(
            SettingsLoader::validate(&settings),
            Err(ConfigError::InvalidRefreshInterval(1))
        ));

        let settings = Settings {
            logging: LogSettings {
                format: "xml".to_string(),
                ..LogSettings::default()
            },
            ..Settings::default()
        };
        assert!(matches!(
            SettingsLoader::validate(&settings),
            Err(ConfigError::InvalidLogFormat(_))
        ));

        let settings = Settings {
            store: StoreSettings {
                backend: "etcd3".to_string(),
                ..StoreSettings::default()
            },
            ..Settings::default()
        };
        assert!(matches!(
            SettingsLoader::validate(&settings),
            Err(ConfigError::InvalidStoreBackend(_))
        ));
    }

    #[test]
    fn test_engine_options_carry_refresh_interval() {
        let settings = Settings {
            engine: EngineSettings {
                refresh_interval_secs: 30,
                ..EngineSettings::default()
            },
            ..Settings::default()
        };
        let options = settings.engine_options();
        assert_eq!(options.timings.refresh_interval, Duration::from_secs(30));
    }
}
