//! Configuration management for the backup catalog.
//!
//! Loads configuration from a TOML file; command-line flags override it.

use crate::executor::DEFAULT_PARALLELISM;
use crate::wal::segment::{validate_segment_size, DEFAULT_SEGMENT_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub wal: WalConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root of the backup catalog
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Segment size for newly added instances, in bytes
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Backups and WAL files removed concurrently
    #[serde(default = "default_max_parallel_removals")]
    pub max_parallel_removals: usize,
}

// Default values
fn default_backup_dir() -> PathBuf {
    PathBuf::from("/var/lib/backup-catalog")
}

fn default_segment_size() -> u64 {
    DEFAULT_SEGMENT_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_parallel_removals() -> usize {
    DEFAULT_PARALLELISM
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
        }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            segment_size: default_segment_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_parallel_removals: default_max_parallel_removals(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_segment_size(self.wal.segment_size)?;
        if self.performance.max_parallel_removals == 0 {
            anyhow::bail!("performance.max_parallel_removals must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.wal.segment_size, 16 * 1024 * 1024);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.performance.max_parallel_removals, DEFAULT_PARALLELISM);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[catalog]\nbackup_dir = \"/srv/backups\"\n\n[log]\nlevel = \"debug\"")?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.catalog.backup_dir, PathBuf::from("/srv/backups"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.wal.segment_size, DEFAULT_SEGMENT_SIZE);
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[wal]\nsegment_size = 12345")?;
        assert!(Config::from_file(file.path()).is_err());

        let mut file = NamedTempFile::new()?;
        writeln!(file, "[performance]\nmax_parallel_removals = 0")?;
        assert!(Config::from_file(file.path()).is_err());
        Ok(())
    }
}
