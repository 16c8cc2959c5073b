//! Configuration management for Tessera
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (TESSERA_* prefix, `__` between section and key)
//! 2. tessera.local.toml (gitignored, local overrides)
//! 3. tessera.toml (git-tracked, project config)
//! 4. ~/.config/tessera/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Tessera configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub bulk: BulkConfig,
    pub statements: StatementsConfig,
    pub translation: TranslationConfig,
    pub logging: LoggingConfig,
}

/// Bulk resolution tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Batch reads slower than this are logged as warnings
    pub slow_read_threshold_ms: u64,
    pub include_global_attributes: bool,
    /// Upper bound on entities per call, 0 for unlimited
    pub max_entities: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            slow_read_threshold_ms: 500,
            include_global_attributes: true,
            max_entities: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementsConfig {
    /// When off, only direct and global attribute values are resolved
    pub evaluate_statements: bool,
}

impl Default for StatementsConfig {
    fn default() -> Self {
        Self {
            evaluate_statements: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Dump the translation context at debug level
    pub log_context: bool,
    /// Credential requirement used when a form declares none
    pub default_credential_requirement: Option<String>,
    /// Directory of `*.json` translation profiles
    pub profiles_dir: PathBuf,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            log_context: false,
            default_credential_requirement: None,
            profiles_dir: PathBuf::from("profiles"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` env-filter directive
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl TesseraConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Read a single TOML file, without layering
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. to write a starter `tessera.toml`
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk.slow_read_threshold_ms == 0 {
            return Err(ConfigError::ValidationError(
                "bulk.slow_read_threshold_ms must be positive".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.filter must not be empty".to_string(),
            ));
        }
        if self
            .translation
            .default_credential_requirement
            .as_deref()
            .is_some_and(|r| r.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "translation.default_credential_requirement must not be blank".to_string(),
            ));
        }
        if self.translation.profiles_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "translation.profiles_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        if self.translation.profiles_dir.is_relative() {
            self.translation.profiles_dir = base_dir.as_ref().join(&self.translation.profiles_dir);
        }
    }
}
