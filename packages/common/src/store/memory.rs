use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::error::StoreError;
use super::traits::{Reclaimed, RubricSync, Store};
use crate::entity::{
    ArtifactId, Assessment, AssessmentAttempt, AssessmentId, AttemptCounts, AttemptId,
    ModelSolution, ModelSolutionId, NewAssessment, NewAttempt, NewResultArtifact, NewRubricEntry,
    NewSubmission, ResultArtifact, RubricEntry, RubricEntryId, RubricKey, StudentId, Submission,
    SubmissionId,
};
use crate::storage::BlobKey;
use crate::{Points, SubmissionStatus};

#[derive(Default)]
struct Arena {
    next_id: i64,
    assessments: BTreeMap<AssessmentId, Assessment>,
    submissions: BTreeMap<SubmissionId, Submission>,
    artifacts: BTreeMap<ArtifactId, ResultArtifact>,
    rubric: BTreeMap<RubricEntryId, RubricEntry>,
    attempts: BTreeMap<AttemptId, AssessmentAttempt>,
    model_solutions: BTreeMap<ModelSolutionId, ModelSolution>,
    /// Highest model solution version issued per assessment.
    model_versions: HashMap<AssessmentId, u32>,
}

impl Arena {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_assessment(&self, id: AssessmentId) -> Result<&Assessment, StoreError> {
        self.assessments
            .get(&id)
            .ok_or_else(|| StoreError::not_found("assessment", id))
    }

    fn submission_mut(&mut self, id: SubmissionId) -> Result<&mut Submission, StoreError> {
        self.submissions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("submission", id))
    }

    fn attempt_mut(&mut self, id: AttemptId) -> Result<&mut AssessmentAttempt, StoreError> {
        self.attempts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("attempt", id))
    }

    fn is_owned(&self, submission_id: SubmissionId) -> bool {
        self.attempts
            .values()
            .any(|a| a.submission_id == submission_id)
            || self
                .model_solutions
                .values()
                .any(|m| m.submission_id == submission_id)
    }

    fn take_artifacts(&mut self, submission_id: SubmissionId) -> Vec<BlobKey> {
        let ids: Vec<ArtifactId> = self
            .artifacts
            .values()
            .filter(|a| a.submission_id == submission_id)
            .map(|a| a.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.artifacts.remove(&id))
            .map(|a| a.blob)
            .collect()
    }

    /// Remove a submission with its artifacts. The archive blob is reclaimed
    /// only when no other submission (a rerun) still points at it.
    fn remove_submission(&mut self, id: SubmissionId) -> Reclaimed {
        let mut reclaimed = Reclaimed {
            submissions: Vec::new(),
            blobs: self.take_artifacts(id),
        };
        if let Some(submission) = self.submissions.remove(&id) {
            let shared = self
                .submissions
                .values()
                .any(|s| s.archive == submission.archive);
            if !shared {
                reclaimed.blobs.push(submission.archive);
            }
            reclaimed.submissions.push(id);
        }
        reclaimed
    }
}

/// Arena-backed [`Store`] keeping every record in memory.
#[derive(Default)]
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_assessment(&self, new: NewAssessment) -> Result<Assessment, StoreError> {
        let mut arena = self.arena.lock().await;
        let assessment = Assessment {
            id: AssessmentId(arena.next_id()),
            name: new.name,
            due_by: new.due_by,
            overrides: new.overrides,
            timeout_secs: new.timeout_secs,
        };
        arena.assessments.insert(assessment.id, assessment.clone());
        Ok(assessment)
    }

    async fn assessment(&self, id: AssessmentId) -> Result<Option<Assessment>, StoreError> {
        Ok(self.arena.lock().await.assessments.get(&id).cloned())
    }

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let mut arena = self.arena.lock().await;
        let submission = Submission {
            id: SubmissionId(arena.next_id()),
            archive: new.archive,
            author_id: new.author_id,
            submitter_id: new.submitter_id,
            status: SubmissionStatus::Pending,
            exit_code: None,
            checksum: None,
            created_at: Utc::now(),
        };
        arena.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn submission(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError> {
        Ok(self.arena.lock().await.submissions.get(&id).cloned())
    }

    async fn set_submission_status(
        &self,
        id: SubmissionId,
        status: SubmissionStatus,
        exit_code: Option<i32>,
    ) -> Result<Submission, StoreError> {
        let mut arena = self.arena.lock().await;
        let submission = arena.submission_mut(id)?;
        submission.status = status;
        submission.exit_code = exit_code;
        Ok(submission.clone())
    }

    async fn set_submission_checksum(
        &self,
        id: SubmissionId,
        checksum: String,
    ) -> Result<Submission, StoreError> {
        let mut arena = self.arena.lock().await;
        let submission = arena.submission_mut(id)?;
        submission.checksum = Some(checksum);
        Ok(submission.clone())
    }

    async fn delete_submission(&self, id: SubmissionId) -> Result<Reclaimed, StoreError> {
        let mut arena = self.arena.lock().await;
        if !arena.submissions.contains_key(&id) {
            return Err(StoreError::not_found("submission", id));
        }
        if arena.is_owned(id) {
            return Err(StoreError::Protected(id));
        }
        Ok(arena.remove_submission(id))
    }

    async fn add_artifacts(
        &self,
        submission_id: SubmissionId,
        artifacts: Vec<NewResultArtifact>,
    ) -> Result<Vec<ResultArtifact>, StoreError> {
        let mut arena = self.arena.lock().await;
        if !arena.submissions.contains_key(&submission_id) {
            return Err(StoreError::not_found("submission", submission_id));
        }

        let mut created = Vec::with_capacity(artifacts.len());
        for new in artifacts {
            let artifact = ResultArtifact {
                id: ArtifactId(arena.next_id()),
                submission_id,
                source: new.source,
                path: new.path,
                compressed: new.compressed,
                mime_type: new.mime_type,
                blob: new.blob,
                size: new.size,
            };
            arena.artifacts.insert(artifact.id, artifact.clone());
            created.push(artifact);
        }
        Ok(created)
    }

    async fn artifacts(&self, submission_id: SubmissionId) -> Result<Vec<ResultArtifact>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena
            .artifacts
            .values()
            .filter(|a| a.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn artifact(&self, id: ArtifactId) -> Result<Option<ResultArtifact>, StoreError> {
        Ok(self.arena.lock().await.artifacts.get(&id).cloned())
    }

    async fn clear_artifacts(&self, submission_id: SubmissionId) -> Result<Vec<BlobKey>, StoreError> {
        Ok(self.arena.lock().await.take_artifacts(submission_id))
    }

    async fn rubric(&self, assessment_id: AssessmentId) -> Result<Vec<RubricEntry>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena
            .rubric
            .values()
            .filter(|r| r.assessment_id == assessment_id)
            .cloned()
            .collect())
    }

    async fn add_rubric_entry(
        &self,
        assessment_id: AssessmentId,
        new: NewRubricEntry,
    ) -> Result<RubricEntry, StoreError> {
        let mut arena = self.arena.lock().await;
        arena.require_assessment(assessment_id)?;
        new.points
            .validate_rubric_range()
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let duplicate = arena
            .rubric
            .values()
            .any(|r| r.assessment_id == assessment_id && r.key == new.key);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "rubric entry {} already exists",
                new.key
            )));
        }

        let entry = RubricEntry {
            id: RubricEntryId(arena.next_id()),
            assessment_id,
            key: new.key,
            points: new.points,
            feedback: new.feedback,
            task: new.task,
        };
        arena.rubric.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn sync_rubric(
        &self,
        assessment_id: AssessmentId,
        keys: &[RubricKey],
    ) -> Result<RubricSync, StoreError> {
        let mut arena = self.arena.lock().await;
        arena.require_assessment(assessment_id)?;

        let stale: Vec<RubricEntryId> = arena
            .rubric
            .values()
            .filter(|r| r.assessment_id == assessment_id && !keys.contains(&r.key))
            .map(|r| r.id)
            .collect();
        let mut sync = RubricSync::default();
        for id in stale {
            if let Some(entry) = arena.rubric.remove(&id) {
                sync.removed.push(entry.key);
            }
        }

        for key in keys {
            let present = arena
                .rubric
                .values()
                .any(|r| r.assessment_id == assessment_id && &r.key == key);
            if present {
                continue;
            }
            let new = NewRubricEntry::unweighted(key.clone());
            let entry = RubricEntry {
                id: RubricEntryId(arena.next_id()),
                assessment_id,
                key: new.key,
                points: new.points,
                feedback: new.feedback,
                task: new.task,
            };
            sync.added.push(entry.key.clone());
            arena.rubric.insert(entry.id, entry);
        }
        Ok(sync)
    }

    async fn update_rubric_points(
        &self,
        assessment_id: AssessmentId,
        updates: &[(RubricEntryId, Points)],
    ) -> Result<Vec<RubricEntry>, StoreError> {
        let mut arena = self.arena.lock().await;
        arena.require_assessment(assessment_id)?;

        for (id, points) in updates {
            match arena.rubric.get(id) {
                Some(entry) if entry.assessment_id == assessment_id => {}
                Some(_) => {
                    return Err(StoreError::Validation(format!(
                        "rubric entry {id} does not belong to assessment {assessment_id}"
                    )));
                }
                None => {
                    return Err(StoreError::Validation(format!(
                        "rubric entry {id} does not exist"
                    )));
                }
            }
            points
                .validate_rubric_range()
                .map_err(|e| StoreError::Validation(e.to_string()))?;
        }

        let mut updated = Vec::with_capacity(updates.len());
        for (id, points) in updates {
            if let Some(entry) = arena.rubric.get_mut(id) {
                entry.points = points.clone();
                updated.push(entry.clone());
            }
        }
        Ok(updated)
    }

    async fn create_attempt(&self, new: NewAttempt) -> Result<AssessmentAttempt, StoreError> {
        let mut arena = self.arena.lock().await;
        arena.require_assessment(new.assessment_id)?;
        if !arena.submissions.contains_key(&new.submission_id) {
            return Err(StoreError::not_found("submission", new.submission_id));
        }
        if arena.is_owned(new.submission_id) {
            return Err(StoreError::Conflict(format!(
                "submission {} already has an owner",
                new.submission_id
            )));
        }

        let number = arena
            .attempts
            .values()
            .filter(|a| a.assessment_id == new.assessment_id && a.student_id == new.student_id)
            .map(|a| a.attempt)
            .max()
            .unwrap_or(0)
            + 1;

        let attempt = AssessmentAttempt {
            id: AttemptId(arena.next_id()),
            assessment_id: new.assessment_id,
            student_id: new.student_id,
            submission_id: new.submission_id,
            attempt: number,
            points: None,
            counts: AttemptCounts::default(),
            model_solution_version: None,
            created_at: Utc::now(),
        };
        arena.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn attempt(&self, id: AttemptId) -> Result<Option<AssessmentAttempt>, StoreError> {
        Ok(self.arena.lock().await.attempts.get(&id).cloned())
    }

    async fn attempt_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<AssessmentAttempt>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena
            .attempts
            .values()
            .find(|a| a.submission_id == submission_id)
            .cloned())
    }

    async fn attempts(
        &self,
        assessment_id: AssessmentId,
        student_id: StudentId,
    ) -> Result<Vec<AssessmentAttempt>, StoreError> {
        let arena = self.arena.lock().await;
        let mut history: Vec<AssessmentAttempt> = arena
            .attempts
            .values()
            .filter(|a| a.assessment_id == assessment_id && a.student_id == student_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.attempt.cmp(&a.attempt));
        Ok(history)
    }

    async fn assessment_attempts(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AssessmentAttempt>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena
            .attempts
            .values()
            .filter(|a| a.assessment_id == assessment_id)
            .cloned()
            .collect())
    }

    async fn record_marks(
        &self,
        attempt_id: AttemptId,
        points: Points,
        counts: AttemptCounts,
    ) -> Result<AssessmentAttempt, StoreError> {
        let mut arena = self.arena.lock().await;
        let attempt = arena.attempt_mut(attempt_id)?;
        attempt.points = Some(points);
        attempt.counts = counts;
        Ok(attempt.clone())
    }

    async fn record_model_solution_version(
        &self,
        attempt_id: AttemptId,
        version: Option<u32>,
    ) -> Result<AssessmentAttempt, StoreError> {
        let mut arena = self.arena.lock().await;
        let attempt = arena.attempt_mut(attempt_id)?;
        attempt.model_solution_version = version;
        Ok(attempt.clone())
    }

    async fn delete_attempt(&self, id: AttemptId) -> Result<Reclaimed, StoreError> {
        let mut arena = self.arena.lock().await;
        let attempt = arena
            .attempts
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("attempt", id))?;
        Ok(arena.remove_submission(attempt.submission_id))
    }

    async fn create_model_solution(
        &self,
        assessment_id: AssessmentId,
        submission_id: SubmissionId,
    ) -> Result<ModelSolution, StoreError> {
        let mut arena = self.arena.lock().await;
        arena.require_assessment(assessment_id)?;
        if !arena.submissions.contains_key(&submission_id) {
            return Err(StoreError::not_found("submission", submission_id));
        }
        if arena.is_owned(submission_id) {
            return Err(StoreError::Conflict(format!(
                "submission {submission_id} already has an owner"
            )));
        }

        let version = arena.model_versions.get(&assessment_id).copied().unwrap_or(0) + 1;
        arena.model_versions.insert(assessment_id, version);

        let solution = ModelSolution {
            id: ModelSolutionId(arena.next_id()),
            assessment_id,
            submission_id,
            version,
        };
        arena.model_solutions.insert(solution.id, solution.clone());
        Ok(solution)
    }

    async fn model_solution(&self, id: ModelSolutionId) -> Result<Option<ModelSolution>, StoreError> {
        Ok(self.arena.lock().await.model_solutions.get(&id).cloned())
    }

    async fn model_solution_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<ModelSolution>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena
            .model_solutions
            .values()
            .find(|m| m.submission_id == submission_id)
            .cloned())
    }

    async fn latest_model_solution(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Option<ModelSolution>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena
            .model_solutions
            .values()
            .filter(|m| m.assessment_id == assessment_id)
            .max_by_key(|m| m.version)
            .cloned())
    }

    async fn delete_model_solution(&self, id: ModelSolutionId) -> Result<Reclaimed, StoreError> {
        let mut arena = self.arena.lock().await;
        let solution = arena
            .model_solutions
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("model solution", id))?;
        Ok(arena.remove_submission(solution.submission_id))
    }
}
