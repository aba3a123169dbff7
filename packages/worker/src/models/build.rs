//! Locating the build root and supervising a running build.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::entity::SubmissionId;
use common::storage::StorageError;
use common::store::{Store, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::archive::ArchiveError;
use crate::config::BuildConfig;
use super::sandbox::{RunningProcess, SandboxError};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no {0} found in the submission")]
    ProjectDescriptorNotFound(String),

    #[error("build did not finish within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directory of the first `descriptor` found in a depth-first walk of `dir`.
///
/// Within a directory, files are visited before subdirectories, both in name
/// order, so a top-level descriptor wins over those of nested modules.
pub fn find_build_root(dir: &Path, descriptor: &str) -> Result<PathBuf, BuildError> {
    let walker = WalkDir::new(dir).sort_by(|a, b| {
        a.file_type()
            .is_dir()
            .cmp(&b.file_type().is_dir())
            .then_with(|| a.file_name().cmp(b.file_name()))
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path while searching for build root");
                continue;
            }
        };
        if entry.file_type().is_file() && entry.file_name() == descriptor {
            if let Some(parent) = entry.path().parent() {
                debug!(root = %parent.display(), "Build root located");
                return Ok(parent.to_path_buf());
            }
        }
    }

    Err(BuildError::ProjectDescriptorNotFound(descriptor.to_string()))
}

/// Entries of `paths`, relative to `src`, that do not lie under `build_root`.
pub fn overrides_outside(src: &Path, build_root: &Path, paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .filter(|path| !src.join(path.trim_start_matches("./")).starts_with(build_root))
        .cloned()
        .collect()
}

/// Delete the report directories before the build runs, so that results
/// can only come from the build itself. Returns how many were present.
pub fn clear_reports(build_root: &Path, config: &BuildConfig) -> Result<usize, BuildError> {
    let dirs = std::iter::once(&config.junit_dir)
        .chain(&config.coverage_dirs)
        .chain(&config.mutation_dirs);

    let mut removed = 0;
    for dir in dirs {
        let path = build_root.join(dir);
        let result = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => Err(e),
        };
        result?;
        warn!(dir = %dir, "Removed report directory shipped with the submission");
        removed += 1;
    }
    Ok(removed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Exited(i32),
    /// The submission was deleted while building and the process was killed.
    Cancelled,
}

/// Poll `process` until it exits.
///
/// Each round checks that the submission still exists; if it has been
/// deleted the process is killed. A build running past `timeout` is killed
/// and reported as [`BuildError::Timeout`].
pub async fn supervise(
    process: &mut RunningProcess,
    store: &dyn Store,
    submission_id: SubmissionId,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<BuildOutcome, BuildError> {
    loop {
        if let Some(code) = process.try_exit_code()? {
            debug!(%submission_id, exit_code = code, elapsed_ms = process.elapsed().as_millis() as u64, "Build process exited");
            return Ok(BuildOutcome::Exited(code));
        }

        if store.submission(submission_id).await?.is_none() {
            info!(%submission_id, "Submission deleted during build, stopping process");
            process.terminate().await?;
            return Ok(BuildOutcome::Cancelled);
        }

        if process.elapsed() >= timeout {
            warn!(%submission_id, timeout_secs = timeout.as_secs(), "Build timed out");
            process.terminate().await?;
            return Err(BuildError::Timeout(timeout));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
