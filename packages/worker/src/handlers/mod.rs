//! One handler per pipeline job. Each re-fetches its target by id and
//! returns cleanly when the target has been deleted in the meantime.

pub mod build;
pub mod checksum;
pub mod mark;
pub mod rubric_sync;

use common::entity::{ArtifactSource, SubmissionId};
use common::store::StoreError;
use tracing::warn;

use crate::error::PipelineError;
use crate::pipeline::Pipeline;

/// `Ok(None)` when the record was deleted.
pub(crate) fn vanished<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Contents of every JUnit report stored for a submission. Reports that
/// cannot be read are logged and left out.
pub(crate) async fn junit_reports(
    pipeline: &Pipeline,
    submission_id: SubmissionId,
) -> Result<Vec<(String, Vec<u8>)>, PipelineError> {
    let mut reports = Vec::new();
    for artifact in pipeline.store.artifacts(submission_id).await? {
        if artifact.source != ArtifactSource::Junit {
            continue;
        }
        match pipeline.artifact_content(&artifact).await {
            Ok(content) => reports.push((artifact.path, content)),
            Err(e) => warn!(report = %artifact.path, error = %e, "Skipping unreadable JUnit report"),
        }
    }
    Ok(reports)
}
