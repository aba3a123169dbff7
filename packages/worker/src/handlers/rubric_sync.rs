use std::collections::HashSet;

use common::entity::{ModelSolutionId, RubricKey};
use tracing::{info, instrument, warn};

use super::junit_reports;
use crate::error::PipelineError;
use crate::models::marking;
use crate::pipeline::Pipeline;

/// Make the assessment's rubric list exactly the tests the latest model
/// solution ran, then re-mark every attempt if anything changed.
#[instrument(skip(pipeline), fields(%model_solution_id))]
pub async fn handle_rubric_sync(
    pipeline: &Pipeline,
    model_solution_id: ModelSolutionId,
) -> Result<(), PipelineError> {
    let store = pipeline.store.as_ref();

    let Some(model_solution) = store.model_solution(model_solution_id).await? else {
        info!("Model solution deleted, skipping rubric sync");
        return Ok(());
    };
    let assessment_id = model_solution.assessment_id;

    let latest = store.latest_model_solution(assessment_id).await?;
    if latest.map(|l| l.id) != Some(model_solution_id) {
        info!("Model solution superseded, skipping rubric sync");
        return Ok(());
    }

    let Some(submission) = store.submission(model_solution.submission_id).await? else {
        info!("Submission deleted, skipping rubric sync");
        return Ok(());
    };
    if !submission.status.is_markable() {
        info!(status = submission.status.as_str(), "Build did not finish, skipping rubric sync");
        return Ok(());
    }

    let suites = marking::parse_reports(junit_reports(pipeline, submission.id).await?);
    if suites.is_empty() {
        warn!("Model solution produced no test reports, rubric left unchanged");
        return Ok(());
    }

    let mut seen = HashSet::new();
    let keys: Vec<RubricKey> = suites
        .iter()
        .flat_map(|s| s.cases.iter())
        .map(|c| RubricKey::new(&c.class_name, &c.name))
        .filter(|k| seen.insert(k.clone()))
        .collect();

    let sync = store.sync_rubric(assessment_id, &keys).await?;
    info!(
        tests = keys.len(),
        added = sync.added.len(),
        removed = sync.removed.len(),
        version = model_solution.version,
        "Rubric synced"
    );

    if !sync.is_unchanged() {
        let remarks = pipeline.remark_all(assessment_id).await?;
        info!(remarks, "Re-marking attempts after rubric change");
    }
    Ok(())
}
