use common::entity::AttemptId;
use tracing::{info, instrument};

use super::{junit_reports, vanished};
use crate::error::PipelineError;
use crate::models::marking;
use crate::pipeline::Pipeline;

/// Mark an attempt from its stored JUnit reports, replacing any earlier marks.
#[instrument(skip(pipeline), fields(%attempt_id))]
pub async fn handle_mark(pipeline: &Pipeline, attempt_id: AttemptId) -> Result<(), PipelineError> {
    let store = pipeline.store.as_ref();

    let Some(attempt) = store.attempt(attempt_id).await? else {
        info!("Attempt deleted, skipping marking");
        return Ok(());
    };
    let Some(submission) = store.submission(attempt.submission_id).await? else {
        info!("Submission deleted, skipping marking");
        return Ok(());
    };
    if !submission.status.is_markable() {
        info!(status = submission.status.as_str(), "Build did not finish, skipping marking");
        return Ok(());
    }

    let suites = marking::parse_reports(junit_reports(pipeline, submission.id).await?);
    let rubric = store.rubric(attempt.assessment_id).await?;
    let outcome = marking::mark(&rubric, &suites);

    let recorded = vanished(
        store
            .record_marks(attempt_id, outcome.points.clone(), outcome.counts)
            .await,
    )?;
    if recorded.is_none() {
        info!("Attempt deleted while marking, marks discarded");
        return Ok(());
    }

    info!(
        points = %outcome.points,
        passed = outcome.counts.passed,
        failed = outcome.counts.failed,
        errored = outcome.counts.errored,
        skipped = outcome.counts.skipped,
        missing = outcome.counts.missing,
        "Attempt marked"
    );
    pipeline.notifier.marks_updated(attempt_id).await;
    Ok(())
}
