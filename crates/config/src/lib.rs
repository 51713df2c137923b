#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for k6x
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/k6x/config.toml)
//! - Environment variables
//! - CLI flags (applied by the binary)

pub mod constants;

use k6x_errors::{ConfigError, Error};
use k6x_types::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

/// Build service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Extension registry filter, handed to the resolver untouched
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Builder engines in order of preference
    #[serde(default = "default_engines")]
    pub builders: Vec<Engine>,
    /// Overrides the CPU based connection limit
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

/// One-shot build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Forward the build container's output to the debug log
    #[serde(default)]
    pub verbose: bool,
    /// Builder engines in order of preference
    #[serde(default = "default_engines")]
    pub engines: Vec<Engine>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            filter: default_filter(),
            builders: default_engines(),
            max_connections: None,
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            engines: default_engines(),
        }
    }
}

impl ServiceConfig {
    /// Number of connections the service accepts at the same time
    #[must_use]
    pub fn connection_limit(&self) -> usize {
        self.max_connections
            .filter(|limit| *limit > 0)
            .unwrap_or_else(|| connection_limit_for(num_cpus::get()))
    }
}

/// Each build occupies a whole container, so only a quarter of the CPUs
/// are used, never fewer than two.
#[must_use]
pub fn connection_limit_for(cpus: usize) -> usize {
    (cpus / 4).max(2)
}

// Default value functions for serde
fn default_addr() -> String {
    constants::DEFAULT_ADDR.to_string()
}

fn default_filter() -> String {
    constants::DEFAULT_FILTER.to_string()
}

fn default_engines() -> Vec<Engine> {
    vec![Engine::Docker]
}

fn default_read_timeout() -> u64 {
    5
}

fn default_write_timeout() -> u64 {
    100
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("k6x").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            tracing::debug!(path = %config_path.display(), "Loading configuration");
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // K6X_ADDR
        if let Ok(addr) = std::env::var("K6X_ADDR") {
            if addr.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "K6X_ADDR".to_string(),
                    value: addr,
                }
                .into());
            }
            self.service.addr = addr;
        }

        // K6X_FILTER
        if let Ok(filter) = std::env::var("K6X_FILTER") {
            self.service.filter = filter;
        }

        // K6X_BUILDER
        if let Ok(builders) = std::env::var("K6X_BUILDER") {
            let engines = Engine::parse_list("K6X_BUILDER", &builders)?;
            if engines.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "K6X_BUILDER".to_string(),
                    value: builders,
                }
                .into());
            }
            self.service.builders.clone_from(&engines);
            self.build.engines = engines;
        }

        // K6X_VERBOSE
        if let Ok(verbose) = std::env::var("K6X_VERBOSE") {
            self.build.verbose = match verbose.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "K6X_VERBOSE".to_string(),
                        value: verbose,
                    }
                    .into())
                }
            };
        }

        Ok(())
    }
}
