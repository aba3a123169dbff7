use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::unsigned;
use crate::entity::{AssessmentId, ModelSolution, ModelSolutionId, SubmissionId};
use crate::store::StoreError;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "model_solution")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique_key = "assessment_version")]
    pub assessment_id: i64,
    #[sea_orm(unique_key = "assessment_version")]
    pub version: i32,

    #[sea_orm(unique)]
    pub submission_id: i64,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for ModelSolution {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, StoreError> {
        Ok(ModelSolution {
            id: ModelSolutionId(model.id),
            assessment_id: AssessmentId(model.assessment_id),
            submission_id: SubmissionId(model.submission_id),
            version: unsigned(model.version, "version")?,
        })
    }
}
