//! Advisory per-instance lock.
//!
//! A mutating operation holds an exclusive `flock` on `catalog.pid` in the
//! instance directory for its whole duration. The kernel drops the lock when
//! the owner exits, so a file left behind by a dead process is simply locked
//! again. The pid written into the file only names the owner in messages.

use crate::utils::errors::{CatalogError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Attempts before giving up when the lock file keeps being replaced.
const MAX_ATTEMPTS: usize = 3;

/// Held for the duration of one mutating operation.
pub struct CatalogLock {
    path: PathBuf,
    // Unlocked on drop, after the file is unlinked.
    _file: Flock<File>,
}

impl CatalogLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        for _ in 0..MAX_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            let locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(locked) => locked,
                Err((_, Errno::EWOULDBLOCK)) => {
                    let owner = read_owner(path)
                        .map_or_else(|| "another process".to_string(), |pid| format!("process {}", pid));
                    return Err(CatalogError::InUse(format!(
                        "catalog {} is locked by {}",
                        path.display(),
                        owner
                    )));
                }
                Err((_, errno)) => return Err(std::io::Error::from(errno).into()),
            };

            // The previous holder unlinks the file before unlocking it. If we
            // locked such an unlinked file, start over on the current one.
            if !is_current(&locked, path)? {
                debug!(lock = %path.display(), "Lock file replaced while locking, retrying");
                continue;
            }

            locked.set_len(0)?;
            let mut writer: &File = &locked;
            writeln!(writer, "{}", std::process::id())?;
            locked.sync_all()?;
            debug!(lock = %path.display(), "Catalog lock acquired");
            return Ok(Self {
                path: path.to_path_buf(),
                _file: locked,
            });
        }

        Err(CatalogError::InUse(format!(
            "could not acquire catalog lock {}",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for CatalogLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogLock").field("path", &self.path).finish()
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        if let Err(e) = crate::fs::remove::remove_file_if_exists(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to remove catalog lock file");
        }
    }
}

/// True when `path` still names the file behind `locked`.
fn is_current(locked: &File, path: &Path) -> Result<bool> {
    let held = locked.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}
