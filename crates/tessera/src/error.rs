//! Error types for the Tessera facade.

use std::path::PathBuf;

use tessera_bulk::BulkError;
use tessera_config::ConfigError;
use tessera_store::StoreError;
use tessera_translation::TranslationError;

/// Result type for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Errors that can occur when using Tessera.
#[derive(Debug, thiserror::Error)]
pub enum TesseraError {
    /// Bulk or point resolution failed.
    #[error(transparent)]
    Bulk(#[from] BulkError),

    /// A translation profile failed to load or run.
    #[error(transparent)]
    Translation(#[from] TranslationError),

    /// The directory store failed outside of a resolution call.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration values are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Layered configuration could not be loaded.
    #[error(transparent)]
    ConfigLoad(#[from] anyhow::Error),

    /// A profile file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two profile files declare the same name.
    #[error("translation profile '{name}' defined twice (second in {path})")]
    DuplicateProfile { name: String, path: PathBuf },

    /// No loaded profile has the requested name.
    #[error("translation profile not found: {0}")]
    ProfileNotFound(String),

    /// The tracing subscriber could not be installed.
    #[error("tracing initialization failed: {0}")]
    Tracing(String),
}
