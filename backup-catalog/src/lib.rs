//! Backup Catalog Library
//!
//! Tracks full and incremental backup chains per database instance, deletes
//! backups together with every dependent descendant, and reclaims archived
//! WAL segments that no retained backup can still use.

pub mod catalog;
pub mod config;
pub mod executor;
pub mod fs;
pub mod graph;
pub mod planner;
pub mod status;
pub mod utils;
pub mod wal;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use catalog::backup::{Backup, BackupId, BackupMode, BackupStatus};
pub use catalog::{Catalog, InstanceCatalog, InstanceConfig};
pub use config::Config;
pub use executor::{DeleteExecutor, DeleteReport, DeleteRequest, DeleteTarget};
pub use utils::errors::CatalogError;
pub type Result<T> = std::result::Result<T, CatalogError>;
