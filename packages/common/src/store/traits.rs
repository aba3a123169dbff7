use async_trait::async_trait;

use super::error::StoreError;
use crate::entity::{
    ArtifactId, AssessmentAttempt, AssessmentId, Assessment, AttemptCounts, AttemptId,
    ModelSolution, ModelSolutionId, NewAssessment, NewAttempt, NewResultArtifact, NewRubricEntry,
    NewSubmission, ResultArtifact, RubricEntry, RubricEntryId, RubricKey, StudentId, Submission,
    SubmissionId,
};
use crate::storage::BlobKey;
use crate::{Points, SubmissionStatus};

/// Blobs and submissions freed by a cascading delete. The caller reclaims the
/// blobs from blob storage once the records are gone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reclaimed {
    pub submissions: Vec<SubmissionId>,
    pub blobs: Vec<BlobKey>,
}

impl Reclaimed {
    pub fn merge(&mut self, other: Reclaimed) {
        self.submissions.extend(other.submissions);
        self.blobs.extend(other.blobs);
    }
}

/// Changes made by [`Store::sync_rubric`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RubricSync {
    pub added: Vec<RubricKey>,
    pub removed: Vec<RubricKey>,
}

impl RubricSync {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Durable record store the pipeline reads and writes by id.
///
/// Every method is atomic. Multi-record operations (cascading deletes, rubric
/// sync, attempt numbering, model solution versioning) either apply fully or
/// not at all.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_assessment(&self, new: NewAssessment) -> Result<Assessment, StoreError>;
    async fn assessment(&self, id: AssessmentId) -> Result<Option<Assessment>, StoreError>;

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError>;
    async fn submission(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError>;
    async fn set_submission_status(
        &self,
        id: SubmissionId,
        status: SubmissionStatus,
        exit_code: Option<i32>,
    ) -> Result<Submission, StoreError>;
    async fn set_submission_checksum(
        &self,
        id: SubmissionId,
        checksum: String,
    ) -> Result<Submission, StoreError>;
    /// Fails with [`StoreError::Protected`] while an attempt or model solution owns the submission.
    async fn delete_submission(&self, id: SubmissionId) -> Result<Reclaimed, StoreError>;

    /// Fails with `NotFound` if the submission has been deleted.
    async fn add_artifacts(
        &self,
        submission_id: SubmissionId,
        artifacts: Vec<NewResultArtifact>,
    ) -> Result<Vec<ResultArtifact>, StoreError>;
    async fn artifacts(&self, submission_id: SubmissionId) -> Result<Vec<ResultArtifact>, StoreError>;
    async fn artifact(&self, id: ArtifactId) -> Result<Option<ResultArtifact>, StoreError>;
    /// Remove every artifact of a submission, returning their blobs.
    async fn clear_artifacts(&self, submission_id: SubmissionId) -> Result<Vec<BlobKey>, StoreError>;

    async fn rubric(&self, assessment_id: AssessmentId) -> Result<Vec<RubricEntry>, StoreError>;
    async fn add_rubric_entry(
        &self,
        assessment_id: AssessmentId,
        new: NewRubricEntry,
    ) -> Result<RubricEntry, StoreError>;
    /// Make the rubric contain exactly `keys`: entries for other keys are
    /// removed, new keys are added unweighted.
    async fn sync_rubric(
        &self,
        assessment_id: AssessmentId,
        keys: &[RubricKey],
    ) -> Result<RubricSync, StoreError>;
    /// Set points on several entries at once. Every entry must belong to the
    /// assessment and every value must be a valid rubric weight, otherwise
    /// nothing changes.
    async fn update_rubric_points(
        &self,
        assessment_id: AssessmentId,
        updates: &[(RubricEntryId, Points)],
    ) -> Result<Vec<RubricEntry>, StoreError>;

    /// Numbers the attempt `max + 1` for its (assessment, student).
    async fn create_attempt(&self, new: NewAttempt) -> Result<AssessmentAttempt, StoreError>;
    async fn attempt(&self, id: AttemptId) -> Result<Option<AssessmentAttempt>, StoreError>;
    async fn attempt_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<AssessmentAttempt>, StoreError>;
    /// Full history for one student, most recent attempt first.
    async fn attempts(
        &self,
        assessment_id: AssessmentId,
        student_id: StudentId,
    ) -> Result<Vec<AssessmentAttempt>, StoreError>;
    async fn assessment_attempts(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AssessmentAttempt>, StoreError>;
    /// Replace the attempt's points and counters.
    async fn record_marks(
        &self,
        attempt_id: AttemptId,
        points: Points,
        counts: AttemptCounts,
    ) -> Result<AssessmentAttempt, StoreError>;
    async fn record_model_solution_version(
        &self,
        attempt_id: AttemptId,
        version: Option<u32>,
    ) -> Result<AssessmentAttempt, StoreError>;
    /// Deletes the attempt together with its submission and artifacts.
    async fn delete_attempt(&self, id: AttemptId) -> Result<Reclaimed, StoreError>;

    /// Registers the submission as the next version, which becomes the latest.
    async fn create_model_solution(
        &self,
        assessment_id: AssessmentId,
        submission_id: SubmissionId,
    ) -> Result<ModelSolution, StoreError>;
    async fn model_solution(&self, id: ModelSolutionId) -> Result<Option<ModelSolution>, StoreError>;
    async fn model_solution_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<ModelSolution>, StoreError>;
    async fn latest_model_solution(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Option<ModelSolution>, StoreError>;
    /// Deletes the model solution together with its submission and artifacts.
    async fn delete_model_solution(&self, id: ModelSolutionId) -> Result<Reclaimed, StoreError>;
}
