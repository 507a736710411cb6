use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub backup_dir: PathBuf,
    pub log_level: String,
    pub max_parallel_removals: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3100),
            backup_dir: PathBuf::from(
                std::env::var("BACKUP_DIR").unwrap_or_else(|_| "/var/lib/backup-catalog".into()),
            ),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            max_parallel_removals: std::env::var("MAX_PARALLEL_REMOVALS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(4),
        }
    }
}
