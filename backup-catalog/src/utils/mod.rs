//! Utility modules for the backup catalog.

pub mod errors;
pub mod logger;

pub use errors::{CatalogError, Result};
