use std::path::{Path, PathBuf};
use std::time::Duration;

use common::SubmissionStatus;
use common::entity::{Assessment, AssessmentAttempt, SubmissionId};
use common::storage::BlobKey;
use tracing::{info, instrument, warn};

use super::vanished;
use crate::error::PipelineError;
use crate::models::archive::{self, ArchiveError};
use crate::models::artifacts::{self, STDERR_FILE, STDOUT_FILE};
use crate::models::build::{self as build_model, BuildError, BuildOutcome};
use crate::models::sandbox::{ProcessSandbox, RunOptions};
use crate::pipeline::Pipeline;

/// What the submission is being built for.
struct BuildTarget {
    assessment: Option<Assessment>,
    /// Set for student attempts; model solutions have none.
    attempt: Option<AssessmentAttempt>,
}

async fn resolve_target(pipeline: &Pipeline, submission_id: SubmissionId) -> Result<BuildTarget, PipelineError> {
    let store = pipeline.store.as_ref();
    let (assessment_id, attempt) = match store.attempt_for_submission(submission_id).await? {
        Some(attempt) => (Some(attempt.assessment_id), Some(attempt)),
        None => (
            store
                .model_solution_for_submission(submission_id)
                .await?
                .map(|m| m.assessment_id),
            None,
        ),
    };
    let assessment = match assessment_id {
        Some(id) => store.assessment(id).await?,
        None => None,
    };
    Ok(BuildTarget {
        assessment,
        attempt,
    })
}

async fn read_archive(pipeline: &Pipeline, key: &BlobKey) -> Result<Vec<u8>, ArchiveError> {
    pipeline
        .blobs
        .get(key)
        .await
        .map_err(|e| ArchiveError::ArchiveUnreadable(e.to_string()))
}

/// Replace the overridden files with the latest model solution's copies and
/// record which version the attempt is built against. Returns the applied
/// override paths, or `None` if the attempt has been deleted.
async fn prepare_attempt(
    pipeline: &Pipeline,
    assessment: &Assessment,
    attempt: &AssessmentAttempt,
    src: &Path,
) -> Result<Option<Vec<String>>, PipelineError> {
    let store = pipeline.store.as_ref();
    let Some(model_solution) = store.latest_model_solution(assessment.id).await? else {
        return Ok(Some(Vec::new()));
    };

    let paths = assessment.override_paths();
    if !paths.is_empty() {
        let reference = store
            .submission(model_solution.submission_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("submission", model_solution.submission_id))?;
        let reference = read_archive(pipeline, &reference.archive).await?;

        let dest = src.to_path_buf();
        let overrides = paths.clone();
        let applied = tokio::task::spawn_blocking(move || {
            archive::apply_overrides(&dest, &reference, &overrides)
        })
        .await??;
        info!(applied, version = model_solution.version, "Overrides applied from model solution");
    }

    let recorded = vanished(
        store
            .record_model_solution_version(attempt.id, Some(model_solution.version))
            .await,
    )?;
    Ok(recorded.map(|_| paths))
}

/// The submission was deleted mid-build.
async fn cancelled(pipeline: &Pipeline, submission_id: SubmissionId) -> Result<(), PipelineError> {
    info!("Build cancelled, submission deleted");
    pipeline
        .notifier
        .status_changed(submission_id, SubmissionStatus::Aborted)
        .await;
    Ok(())
}

/// Build a submission and collect its result artifacts.
///
/// Status goes `Running` and then `Completed` or `Failed` by exit code. If
/// the submission is deleted while building, the process is killed and an
/// `Aborted` status change is published; nothing is collected.
#[instrument(skip(pipeline), fields(%submission_id))]
pub async fn handle_build(pipeline: &Pipeline, submission_id: SubmissionId) -> Result<(), PipelineError> {
    let store = pipeline.store.as_ref();
    let blobs = pipeline.blobs.as_ref();
    let config = &pipeline.config;

    let Some(submission) = store.submission(submission_id).await? else {
        info!("Submission deleted, skipping build");
        return Ok(());
    };
    if vanished(
        store
            .set_submission_status(submission_id, SubmissionStatus::Running, None)
            .await,
    )?
    .is_none()
    {
        info!("Submission deleted, skipping build");
        return Ok(());
    }
    pipeline
        .notifier
        .status_changed(submission_id, SubmissionStatus::Running)
        .await;

    let stale = store.clear_artifacts(submission_id).await?;
    if !stale.is_empty() {
        info!(count = stale.len(), "Removing artifacts of previous run");
        artifacts::discard(blobs, &stale).await;
    }

    let target = resolve_target(pipeline, submission_id).await?;
    let timeout_secs = target
        .assessment
        .as_ref()
        .and_then(|a| a.timeout_secs)
        .unwrap_or(config.build.timeout_secs);

    let workspace = tempfile::Builder::new()
        .prefix("autofeedback-build-")
        .tempdir()?;
    let src = workspace.path().join("src");
    let out = workspace.path().join("out");
    std::fs::create_dir_all(&src)?;
    std::fs::create_dir_all(&out)?;

    let data = match read_archive(pipeline, &submission.archive).await {
        Ok(data) => data,
        Err(e) => {
            if store.submission(submission_id).await?.is_none() {
                return cancelled(pipeline, submission_id).await;
            }
            return Err(e.into());
        }
    };
    let max_size = config.archive.max_uncompressed_size;
    let dest = src.clone();
    let extracted =
        tokio::task::spawn_blocking(move || archive::extract_all(&data, &dest, max_size)).await??;
    info!(files = extracted, "Archive extracted");

    let mut overrides = Vec::new();
    if let (Some(assessment), Some(attempt)) = (&target.assessment, &target.attempt) {
        match prepare_attempt(pipeline, assessment, attempt, &src).await? {
            Some(applied) => overrides = applied,
            None => {
                info!("Attempt deleted, skipping build");
                return Ok(());
            }
        }
    }

    let build_root: PathBuf = build_model::find_build_root(&src, &config.build.descriptor_name)?;
    let stray = build_model::overrides_outside(&src, &build_root, &overrides);
    if !stray.is_empty() {
        warn!(
            build_root = %build_root.strip_prefix(&src).unwrap_or(&build_root).display(),
            overrides = ?stray,
            "Overrides lie outside the build root and will not affect the build"
        );
    }
    build_model::clear_reports(&build_root, &config.build)?;
    let sandbox = ProcessSandbox::from_config(&config.build);
    let mut process = sandbox
        .spawn(&RunOptions {
            work_dir: build_root.clone(),
            stdout: out.join(STDOUT_FILE),
            stderr: out.join(STDERR_FILE),
        })
        .map_err(BuildError::from)?;

    let outcome = build_model::supervise(
        &mut process,
        store,
        submission_id,
        Duration::from_secs(timeout_secs),
        Duration::from_millis(config.build.poll_interval_ms),
    )
    .await?;

    let exit_code = match outcome {
        BuildOutcome::Cancelled => return cancelled(pipeline, submission_id).await,
        BuildOutcome::Exited(code) => code,
    };

    let status = SubmissionStatus::from_exit_code(exit_code);
    if vanished(
        store
            .set_submission_status(submission_id, status, Some(exit_code))
            .await,
    )?
    .is_none()
    {
        info!("Submission deleted after build, discarding results");
        return Ok(());
    }
    pipeline.notifier.status_changed(submission_id, status).await;
    info!(exit_code, status = status.as_str(), "Build finished");

    let files = artifacts::collect_files(&build_root, &out, &config.build);
    let stored = artifacts::store_files(blobs, submission_id, &files, config.storage.compress_threshold).await?;
    let keys: Vec<BlobKey> = stored.iter().map(|a| a.blob.clone()).collect();

    match store.add_artifacts(submission_id, stored).await {
        Ok(saved) => {
            info!(artifacts = saved.len(), "Result artifacts stored");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            info!("Submission deleted while storing artifacts, discarding them");
            artifacts::discard(blobs, &keys).await;
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Failed to record artifacts");
            artifacts::discard(blobs, &keys).await;
            Err(e.into())
        }
    }
}
