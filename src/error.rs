// src/error.rs

//! Crate-wide error type
//!
//! One taxonomy for the whole engine. The rule of thumb: recoverable
//! conditions are resolved locally by each component (an optional probe
//! failing just lowers a health score); integrity and referential failures
//! always propagate to the caller.

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration key is missing or invalid
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Backup payload digest did not match the manifest digest
    #[error("integrity error: digest mismatch (manifest {expected}, computed {actual})")]
    Integrity { expected: String, actual: String },

    /// A backup unit or other target does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A restore applied only part of the target state
    #[error("partial failure in {collection}: {applied} applied, {pending} pending")]
    PartialFailure {
        collection: String,
        applied: usize,
        pending: usize,
    },

    /// Another recovery operation or pipeline run is already in progress
    #[error("busy: {0}")]
    Busy(String),

    /// A pipeline step failed, aborting the deployment run
    #[error("pipeline step '{step}' failed: {reason}")]
    FatalPipeline { step: String, reason: String },

    /// Access token did not match the configured shared secret
    #[error("unauthorized: access token mismatch")]
    Unauthorized,

    /// Operation was cancelled via the cancel token
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Backup unit creation failed before the manifest was written
    #[error("backup creation failed: {0}")]
    BackupCreation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Machine-checkable kind string used in command results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Integrity { .. } => "integrity",
            Self::NotFound(_) => "not_found",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Busy(_) => "busy",
            Self::FatalPipeline { .. } => "fatal_pipeline",
            Self::Unauthorized => "unauthorized",
            Self::Cancelled(_) => "cancelled",
            Self::BackupCreation(_) => "backup_creation",
            Self::Io(_) => "io",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::Http(_) => "http",
            Self::ConfigParse(_) => "config_parse",
        }
    }
}
