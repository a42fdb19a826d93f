//! Removal of stale files from the storage directories.
//!
//! A request normally deletes its own files, but anything orphaned (abandoned downloads, crashes
//! mid-request) is picked up here. Only files older than the retention window are touched, which
//! keeps the sweep from racing with in-flight requests.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::{Duration, SystemTime};

use futures::{Stream, StreamExt, stream};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::storage;

/// Outcome of a sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for SweepReport {
    fn add_assign(&mut self, other: Self) {
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

/// Delete every regular file in `directory` last modified more than `max_age` ago.
///
/// Failing to inspect or delete one file is logged and counted, and the sweep carries on. An
/// error part way through listing the directory is counted once and ends the sweep with what was
/// done so far. A missing directory is an empty sweep. Only failing to open the directory is an
/// error.
#[instrument(skip_all, fields(directory = %directory.display()))]
pub async fn sweep(directory: &Path, max_age: Duration) -> io::Result<SweepReport> {
    let entries = match fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Directory does not exist, nothing to sweep");
            return Ok(SweepReport::default());
        }
        Err(e) => return Err(e),
    };

    let paths = stream::unfold(entries, |mut entries| async move {
        match entries.next_entry().await {
            Ok(Some(entry)) => Some((Ok(entry.path()), entries)),
            Ok(None) => None,
            Err(e) => Some((Err(e), entries)),
        }
    });

    Ok(sweep_paths(paths, max_age, |path| async move { storage::delete_if_exists(&path).await }).await)
}

async fn sweep_paths<S, D, F>(paths: S, max_age: Duration, delete: D) -> SweepReport
where
    S: Stream<Item = io::Result<PathBuf>>,
    D: Fn(PathBuf) -> F,
    F: Future<Output = io::Result<bool>>,
{
    let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut report = SweepReport::default();
    let mut paths = pin!(paths);

    while let Some(path) = paths.next().await {
        let path = match path {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "Failed to list directory, stopping sweep early");
                report.failed += 1;
                break;
            }
        };

        // Symlinks are not followed: is_file() is false for them
        let modified = match fs::symlink_metadata(&path).await {
            Ok(metadata) if !metadata.is_file() => continue,
            Ok(metadata) => metadata.modified(),
            Err(e) => Err(e),
        };
        let modified = match modified {
            Ok(modified) => modified,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read modification time");
                report.failed += 1;
                continue;
            }
        };

        if modified >= cutoff {
            continue;
        }

        match delete(path.clone()).await {
            Ok(true) => {
                info!(path = %path.display(), "Deleted old file");
                report.removed += 1;
            }
            Ok(false) => debug!(path = %path.display(), "Old file disappeared before it could be deleted"),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to delete old file");
                report.failed += 1;
            }
        }
    }

    report
}

/// Sweep each directory in turn. Errors are logged, never returned.
pub async fn sweep_all(directories: &[PathBuf], max_age: Duration) -> SweepReport {
    let mut total = SweepReport::default();
    for directory in directories {
        match sweep(directory, max_age).await {
            Ok(report) => total += report,
            Err(e) => error!(directory = %directory.display(), error = %e, "Cleanup sweep failed"),
        }
    }
    total
}

/// Run [`sweep_all`] every `interval` until `shutdown` is cancelled.
///
/// The first sweep happens one full interval after spawning.
pub fn spawn_periodic_sweep(
    directories: Vec<PathBuf>,
    max_age: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval = ?interval, max_age = ?max_age, "Starting periodic cleanup");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; skip that one
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Periodic cleanup shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = sweep_all(&directories, max_age).await;
                    debug!(removed = report.removed, failed = report.failed, "Periodic cleanup finished");
                }
            }
        }
    })
}
