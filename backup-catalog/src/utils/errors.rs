//! Custom error types for the backup catalog.

use crate::catalog::backup::BackupId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instance '{0}' does not exist in the catalog")]
    InstanceNotFound(String),

    #[error("Backup {0} not found")]
    NotFound(BackupId),

    #[error("Backup in use: {0}")]
    InUse(String),

    #[error("Backup {id} has corrupt metadata: {reason}")]
    CorruptMetadata { id: BackupId, reason: String },

    #[error("Failed to remove {}: {source}", path.display())]
    PartialIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid backup ID: {0}")]
    InvalidBackupId(String),

    #[error("Invalid LSN: {0}")]
    InvalidLsn(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Metadata parse error: {0}")]
    Deserialize(#[from] toml::de::Error),

    #[error("Metadata write error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
