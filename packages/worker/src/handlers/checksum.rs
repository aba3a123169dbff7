use common::entity::SubmissionId;
use common::storage::StorageError;
use tracing::{debug, info, instrument, warn};

use super::vanished;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;

/// Record the SHA-256 of the submission's archive.
#[instrument(skip(pipeline), fields(%submission_id))]
pub async fn handle_checksum(pipeline: &Pipeline, submission_id: SubmissionId) -> Result<(), PipelineError> {
    let Some(submission) = pipeline.store.submission(submission_id).await? else {
        info!("Submission deleted, skipping checksum");
        return Ok(());
    };

    let hash = match pipeline.blobs.checksum(&submission.archive).await {
        Ok(hash) => hash,
        Err(StorageError::NotFound(key)) => {
            warn!(blob = %key, "Archive blob missing, skipping checksum");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let checksum = hash.to_hex();
    if vanished(pipeline.store.set_submission_checksum(submission_id, checksum.clone()).await)?.is_none() {
        info!("Submission deleted, checksum discarded");
        return Ok(());
    }
    debug!(%checksum, "Checksum recorded");
    Ok(())
}
