//! Configuration management for the record store
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (pbstore.toml)
//! - Environment variables (PBSTORE__*)
//!
//! ## Example config file (pbstore.toml):
//! ```toml
//! [registry]
//! proto_dir = "./protos"
//! extension = "proto"
//!
//! [import]
//! enabled = true
//! worker_name = "pb-import"
//!
//! [logging]
//! filter = "pbstore=debug,info"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Schema registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Background import settings
    #[serde(default)]
    pub import: ImportConfig,

    /// Log filter used when RUST_LOG is unset
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding the `.proto` files loaded at startup.
    /// Imported files are written here too.
    #[serde(default = "default_proto_dir")]
    pub proto_dir: PathBuf,

    /// File extension of schema files, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// Import worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Spawn the background import worker
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Thread name of the worker
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

// Default value functions
fn default_proto_dir() -> PathBuf {
    PathBuf::from("protos")
}

fn default_extension() -> String {
    "proto".to_string()
}

fn default_true() -> bool {
    true
}

fn default_worker_name() -> String {
    "pb-import".to_string()
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            proto_dir: default_proto_dir(),
            extension: default_extension(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_name: default_worker_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["pbstore.toml", ".pbstore.toml", "config/pbstore.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "pbstore") {
            let xdg_config = config_dir.config_dir().join("pbstore.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // PBSTORE__REGISTRY__PROTO_DIR=...
        builder = builder.add_source(
            Environment::with_prefix("PBSTORE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Schema directory, resolved against the working directory
    pub fn proto_dir(&self) -> PathBuf {
        if self.registry.proto_dir.is_absolute() {
            self.registry.proto_dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.registry.proto_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.registry.extension, "proto");
        assert!(config.import.enabled);
        assert_eq!(config.import.worker_name, "pb-import");
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_serialize_config() {
        let config = StoreConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[registry]"));
        assert!(toml_str.contains("[import]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_save_and_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.toml");
        let path = path.to_str().unwrap();

        let mut config = StoreConfig::default();
        config.registry.proto_dir = PathBuf::from("/srv/protos");
        config.import.enabled = false;
        config.save(path).unwrap();

        let loaded = StoreConfig::load_from(Some(path)).unwrap();
        assert_eq!(loaded.registry.proto_dir, PathBuf::from("/srv/protos"));
        assert!(!loaded.import.enabled);
        assert_eq!(loaded.import.worker_name, "pb-import");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[logging]\nfilter = \"debug\"\n").unwrap();

        let loaded = StoreConfig::load_from(path.to_str()).unwrap();
        assert_eq!(loaded.logging.filter, "debug");
        assert_eq!(loaded.registry.extension, "proto");
    }
}
