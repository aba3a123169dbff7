use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssessmentId, AttemptId, StudentId, SubmissionId};
use crate::Points;

/// Test outcome counters of a marked attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounts {
    pub passed: u32,
    pub failed: u32,
    pub errored: u32,
    pub skipped: u32,
    pub missing: u32,
}

/// One graded submission in a student's history for an assessment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentAttempt {
    pub id: AttemptId,
    pub assessment_id: AssessmentId,
    pub student_id: StudentId,
    pub submission_id: SubmissionId,
    /// 1-based, assigned once and never changed.
    pub attempt: u32,
    /// `None` while marking is pending.
    pub points: Option<Points>,
    pub counts: AttemptCounts,
    /// Model solution version the attempt was last built against.
    pub model_solution_version: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl AssessmentAttempt {
    pub fn is_marked(&self) -> bool {
        self.points.is_some()
    }

    /// The attempt was evaluated against an older model solution than `latest_version`.
    pub fn is_outdated(&self, latest_version: Option<u32>) -> bool {
        match (self.model_solution_version, latest_version) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(used), Some(latest)) => used < latest,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewAttempt {
    pub assessment_id: AssessmentId,
    pub student_id: StudentId,
    pub submission_id: SubmissionId,
}
