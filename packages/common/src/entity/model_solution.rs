use serde::{Deserialize, Serialize};

use super::{AssessmentId, ModelSolutionId, SubmissionId};

/// A versioned reference solution for an assessment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSolution {
    pub id: ModelSolutionId,
    pub assessment_id: AssessmentId,
    pub submission_id: SubmissionId,
    /// Starts at 1 and increases by one per upload.
    pub version: u32,
}
