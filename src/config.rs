//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the formulary search engine, supporting TOML
//! files, environment variable overrides, and validated defaults for every
//! subsystem (server, release cache, CMS catalog, RxNorm, search behavior).
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables, CLI arguments
//! - **Output**: Validated configuration structs with defaults and overrides
//! - **Validation**: Range checks and dependency verification at load time
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Command line arguments (highest priority)
//! 2. Environment variables
//! 3. Configuration files
//! 4. Default values (lowest priority)
//!
//! ## Usage
//! ```rust,no_run
//! use formulary_search::config::Config;
//!
//! let config = Config::from_file("config.toml").unwrap();
//! println!("Server port: {}", config.server.port);
//! ```

use crate::errors::{FormularyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure containing all system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server and API configuration
    pub server: ServerConfig,
    /// Release cache settings
    pub cache: CacheConfig,
    /// CMS data catalog settings
    pub catalog: CatalogConfig,
    /// RxNorm vocabulary service settings
    pub rxnorm: RxNormConfig,
    /// Search engine behavior
    pub search: SearchConfig,
    /// Logging and monitoring
    pub logging: LoggingConfig,
}

/// Server and API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of HTTP worker threads
    pub workers: usize,
    /// Enable CORS
    pub enable_cors: bool,
}

/// Release cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root directory (manifest plus per-month archive/extract dirs)
    pub root_dir: PathBuf,
    /// Days a downloaded release stays valid before a re-download
    pub retention_days: u64,
}

/// CMS data catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog base URL; the discovery document lives at `<base>/data.json`
    pub base_url: String,
    /// Title of the monthly formulary dataset inside the catalog
    pub dataset_title: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

/// RxNorm vocabulary service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxNormConfig {
    /// REST base URL; drug lookups hit `<base>/drugs.json`
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

/// Search engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default page size for the canonical search entry point
    pub default_page_size: usize,
    /// Default page size for the drug-coverage convenience entry point
    pub coverage_page_size: usize,
    /// Seconds the parsed dataset stays cached in memory before a reload
    pub dataset_ttl_seconds: u64,
}

/// Logging and monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable structured JSON logging
    pub json_format: bool,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            let mut config = Self::default();
            config.apply_env_overrides()?;
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| FormularyError::Config {
            message: format!("Failed to read config file {:?}: {}", path, e),
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| FormularyError::Config {
            message: format!("Failed to parse config file {:?}: {}", path, e),
        })?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("FORMULARY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("FORMULARY_PORT") {
            self.server.port = port.parse().map_err(|_| FormularyError::Config {
                message: "Invalid port number in FORMULARY_PORT".to_string(),
            })?;
        }
        if let Ok(cache_dir) = std::env::var("FORMULARY_CACHE_DIR") {
            self.cache.root_dir = PathBuf::from(cache_dir);
        }
        if let Ok(catalog_url) = std::env::var("FORMULARY_CATALOG_URL") {
            self.catalog.base_url = catalog_url;
        }
        if let Ok(rxnorm_url) = std::env::var("FORMULARY_RXNORM_URL") {
            self.rxnorm.base_url = rxnorm_url;
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(FormularyError::Config {
                message: "server.port cannot be zero".to_string(),
            });
        }

        if self.cache.retention_days == 0 {
            return Err(FormularyError::Config {
                message: "cache.retention_days must be greater than zero".to_string(),
            });
        }

        if self.search.default_page_size == 0 || self.search.coverage_page_size == 0 {
            return Err(FormularyError::Config {
                message: "search page sizes must be greater than zero".to_string(),
            });
        }

        if self.catalog.dataset_title.trim().is_empty() {
            return Err(FormularyError::Config {
                message: "catalog.dataset_title cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: num_cpus::get(),
                enable_cors: true,
            },
            cache: CacheConfig {
                root_dir: PathBuf::from("./data/formulary-cache"),
                retention_days: 30,
            },
            catalog: CatalogConfig {
                base_url: "https://data.cms.gov".to_string(),
                dataset_title:
                    "Monthly Prescription Drug Plan Formulary and Pharmacy Network Information"
                        .to_string(),
                timeout_seconds: 30,
            },
            rxnorm: RxNormConfig {
                base_url: "https://rxnav.nlm.nih.gov/REST".to_string(),
                timeout_seconds: 30,
            },
            search: SearchConfig {
                default_page_size: 25,
                coverage_page_size: 100,
                dataset_ttl_seconds: 3600,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.default_page_size, 25);
        assert_eq!(config.search.coverage_page_size, 100);
        assert_eq!(config.cache.retention_days, 30);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"
[server]
host = "0.0.0.0"
port = 9090
workers = 2
enable_cors = false

[cache]
root_dir = "/tmp/fx-cache"
retention_days = 7

[catalog]
base_url = "https://data.cms.gov"
dataset_title = "Monthly Prescription Drug Plan Formulary and Pharmacy Network Information"
timeout_seconds = 10

[rxnorm]
base_url = "https://rxnav.nlm.nih.gov/REST"
timeout_seconds = 10

[search]
default_page_size = 25
coverage_page_size = 100
dataset_ttl_seconds = 60

[logging]
level = "debug"
json_format = true
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.cache.retention_days, 7);
        assert_eq!(config.search.dataset_ttl_seconds, 60);
        assert!(config.logging.json_format);
    }

    #[test]
    fn zero_retention_is_rejected() {
        let mut config = Config::default();
        config.cache.retention_days = 0;
        assert!(config.validate().is_err());
    }
}
