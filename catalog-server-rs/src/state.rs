use crate::config::AppConfig;
use crate::error::AppError;
use backup_catalog::{Catalog, InstanceCatalog};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub config: AppConfig,
    /// Instances with a mutating request in flight.
    pub running_ops: Arc<Mutex<HashSet<String>>>,
    /// Cancelled on shutdown; running deletions stop between stages.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            running_ops: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    pub fn catalog(&self) -> Result<Catalog, AppError> {
        Ok(Catalog::open(&self.config.backup_dir)?)
    }

    pub fn instance(&self, name: &str) -> Result<InstanceCatalog, AppError> {
        Ok(self.catalog()?.instance(name)?)
    }

    /// Claim `instance` for a mutating request. The catalog lock file covers
    /// other processes; this rejects overlapping requests early.
    ///
    /// The claim is released when the returned guard drops, including when
    /// the request future is dropped mid-flight.
    pub fn begin_op(&self, instance: &str) -> Result<OpGuard, AppError> {
        let mut running = self
            .running_ops
            .lock()
            .map_err(|_| anyhow::anyhow!("running operations set poisoned"))?;
        if !running.insert(instance.to_string()) {
            return Err(AppError::Conflict(format!(
                "an operation on instance '{}' is already running",
                instance
            )));
        }
        Ok(OpGuard {
            running_ops: Arc::clone(&self.running_ops),
            instance: instance.to_string(),
        })
    }
}

/// Marks one instance busy while alive.
pub struct OpGuard {
    running_ops: Arc<Mutex<HashSet<String>>>,
    instance: String,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.running_ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.instance);
    }
}
