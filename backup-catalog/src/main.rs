//! Backup Catalog - Main entry point
//!
//! Lists, deletes and prunes backups of database instances.

use anyhow::{bail, Context, Result};
use backup_catalog::wal::coverage::{check_all, WalCoverage};
use backup_catalog::wal::PruneReport;
use backup_catalog::{
    status, utils, BackupId, BackupStatus, Catalog, Config, DeleteExecutor, DeleteReport,
    DeleteRequest, InstanceConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Catalog root directory (overrides config)
    #[arg(short = 'B', long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty catalog
    Init,

    /// Register a database instance
    AddInstance {
        #[arg(long)]
        instance: String,

        /// WAL segment size in bytes (overrides config)
        #[arg(long)]
        wal_segment_size: Option<u64>,
    },

    /// List backups, newest first
    Show {
        #[arg(long)]
        instance: String,

        #[arg(short = 'i', long = "backup-id")]
        backup_id: Option<BackupId>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Delete backups with their dependents and/or prune the WAL archive
    Delete {
        #[arg(long)]
        instance: String,

        #[arg(short = 'i', long = "backup-id")]
        backup_id: Option<BackupId>,

        /// Delete every backup with this status
        #[arg(long, conflicts_with = "backup_id")]
        status: Option<BackupStatus>,

        /// Remove WAL segments no remaining backup needs
        #[arg(long)]
        wal: bool,

        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Force the status of a backup
    SetStatus {
        #[arg(long)]
        instance: String,

        #[arg(short = 'i', long = "backup-id")]
        backup_id: BackupId,

        #[arg(long)]
        status: BackupStatus,
    },

    /// Delete an instance with all of its backups and WAL
    DelInstance {
        #[arg(long)]
        instance: String,
    },

    /// Check that every backup's WAL range is still archived
    CheckWal {
        #[arg(long)]
        instance: String,

        #[arg(short = 'i', long = "backup-id")]
        backup_id: Option<BackupId>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let root = args.backup_dir.unwrap_or_else(|| config.catalog.backup_dir.clone());
    let parallelism = config.performance.max_parallel_removals;

    match args.command {
        Command::Init => {
            Catalog::init(&root)?;
            println!("Catalog initialized at {}", root.display());
        }

        Command::AddInstance {
            instance,
            wal_segment_size,
        } => {
            let catalog = Catalog::open(&root)?;
            let instance_config = InstanceConfig {
                wal_segment_size: wal_segment_size.unwrap_or(config.wal.segment_size),
            };
            catalog.add_instance(&instance, instance_config)?;
            println!("Instance '{}' added", instance);
        }

        Command::Show {
            instance,
            backup_id,
            format,
        } => {
            let instance = Catalog::open(&root)?.instance(&instance)?;
            let rows = status::show(&instance.list_backups()?, backup_id)?;
            match format {
                OutputFormat::Text => print!("{}", status::render_table(&rows)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }

        Command::Delete {
            instance,
            backup_id,
            status,
            wal,
            dry_run,
            format,
        } => {
            let request = match (backup_id, status) {
                (Some(id), _) => DeleteRequest::backup(id).with_wal(wal),
                (None, Some(status)) => DeleteRequest::status(status).with_wal(wal),
                (None, None) if wal => DeleteRequest::wal_only(),
                (None, None) => bail!("delete needs --backup-id, --status or --wal"),
            }
            .with_dry_run(dry_run);

            let instance = Catalog::open(&root)?.instance(&instance)?;
            let cancel_token = cancel_on_ctrl_c();
            let executor = DeleteExecutor::with_cancel(instance, parallelism, cancel_token);
            let report = executor.execute(request).await?;

            print_delete_report(&report, format)?;
            if !report.is_success() {
                bail!("deletion did not complete");
            }
        }

        Command::SetStatus {
            instance,
            backup_id,
            status,
        } => {
            let instance = Catalog::open(&root)?.instance(&instance)?;
            let _lock = instance.lock()?;
            instance.set_status(backup_id, status)?;
            println!("Backup {} status set to {}", backup_id, status);
        }

        Command::DelInstance { instance } => {
            let name = instance;
            let instance = Catalog::open(&root)?.instance(&name)?;
            let executor = DeleteExecutor::with_cancel(instance, parallelism, cancel_on_ctrl_c());
            let report = executor.delete_instance().await?;

            print_delete_report(&report, OutputFormat::Text)?;
            if !report.is_success() {
                bail!("instance '{}' was not fully deleted", name);
            }
            println!("Instance '{}' deleted", name);
        }

        Command::CheckWal {
            instance,
            backup_id,
            format,
        } => {
            let instance = Catalog::open(&root)?.instance(&instance)?;
            let mut backups = instance.list_backups()?;
            if let Some(id) = backup_id {
                backups.retain(|b| b.id == id);
                if backups.is_empty() {
                    bail!("backup {} not found", id);
                }
            }

            let results = check_all(&backups, &instance.list_wal_files()?);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                OutputFormat::Text => {
                    for result in &results {
                        match &result.coverage {
                            WalCoverage::Complete => println!("{}  {}  WAL complete", result.id, result.status),
                            WalCoverage::Unknown => println!("{}  {}  WAL range unknown", result.id, result.status),
                            WalCoverage::Missing(segments) => println!(
                                "{}  {}  {} WAL segment(s) missing, first on timeline {} segment {}",
                                result.id,
                                result.status,
                                segments.len(),
                                segments[0].timeline,
                                segments[0].segno
                            ),
                        }
                    }
                }
            }
            if results.iter().any(|r| matches!(r.coverage, WalCoverage::Missing(_))) {
                bail!("WAL is missing for at least one backup");
            }
        }
    }

    Ok(())
}

/// Cancel running deletions between stages on Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received SIGINT (Ctrl+C), stopping after the current stage...");
            handle.cancel();
        }
    });
    token
}

fn print_delete_report(report: &DeleteReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    if report.dry_run {
        for id in &report.planned {
            println!("{} backup {}", verb, id);
        }
    } else {
        for id in &report.removed {
            println!("{} backup {}", verb, id);
        }
    }
    for failure in &report.failed {
        println!("Failed to delete backup {}: {}", failure.id, failure.error);
    }
    for id in &report.skipped {
        println!("Skipped backup {}", id);
    }
    if report.cancelled {
        println!("Deletion cancelled");
    }
    if let Some(prune) = &report.prune {
        print_prune_report(prune);
    }
    Ok(())
}

fn print_prune_report(report: &PruneReport) {
    let verb = if report.dry_run { "would be removed" } else { "removed" };
    match (&report.min_removed, &report.max_removed) {
        (Some(min), Some(max)) => {
            println!("WAL segments {}: {} ({} .. {})", verb, report.removed, min, max);
        }
        _ => println!("No WAL segments eligible for removal"),
    }
    for failure in &report.failed {
        println!("Failed to remove WAL file {}: {}", failure.name, failure.error);
    }
    for inconsistency in &report.inconsistencies {
        println!("Kept WAL conservatively: {}", inconsistency);
    }
}
