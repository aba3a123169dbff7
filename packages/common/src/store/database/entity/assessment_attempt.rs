use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::unsigned;
use crate::Points;
use crate::entity::{AssessmentAttempt, AssessmentId, AttemptCounts, AttemptId, StudentId, SubmissionId};
use crate::store::StoreError;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assessment_attempt")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique_key = "student_attempt")]
    pub assessment_id: i64,
    #[sea_orm(unique_key = "student_attempt")]
    pub student_id: i64,
    #[sea_orm(unique_key = "student_attempt")]
    pub attempt: i32,

    #[sea_orm(unique)]
    pub submission_id: i64,

    /// `None` while marking is pending.
    pub points: Option<String>,

    pub passed: i32,
    pub failed: i32,
    pub errored: i32,
    pub skipped: i32,
    pub missing: i32,

    pub model_solution_version: Option<i32>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for AssessmentAttempt {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, StoreError> {
        let points = model
            .points
            .map(|p| p.parse::<Points>())
            .transpose()
            .map_err(|e| StoreError::Database(format!("attempt {}: {e}", model.id)))?;
        Ok(AssessmentAttempt {
            id: AttemptId(model.id),
            assessment_id: AssessmentId(model.assessment_id),
            student_id: StudentId(model.student_id),
            submission_id: SubmissionId(model.submission_id),
            attempt: unsigned(model.attempt, "attempt")?,
            points,
            counts: AttemptCounts {
                passed: unsigned(model.passed, "passed")?,
                failed: unsigned(model.failed, "failed")?,
                errored: unsigned(model.errored, "errored")?,
                skipped: unsigned(model.skipped, "skipped")?,
                missing: unsigned(model.missing, "missing")?,
            },
            model_solution_version: model
                .model_solution_version
                .map(|v| unsigned(v, "model_solution_version"))
                .transpose()?,
            created_at: model.created_at,
        })
    }
}
