use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Points;
use crate::entity::{AssessmentId, RubricEntry, RubricEntryId, RubricKey};
use crate::store::StoreError;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rubric_entry")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique_key = "assessment_test")]
    pub assessment_id: i64,
    #[sea_orm(unique_key = "assessment_test")]
    pub class_name: String,
    #[sea_orm(unique_key = "assessment_test")]
    pub name: String,

    /// Decimal string with two places, e.g. "10.00".
    pub points: String,

    #[sea_orm(column_type = "Text")]
    pub feedback: String,

    pub task: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for RubricEntry {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, StoreError> {
        let points: Points = model
            .points
            .parse()
            .map_err(|e| StoreError::Database(format!("rubric entry {}: {e}", model.id)))?;
        Ok(RubricEntry {
            id: RubricEntryId(model.id),
            assessment_id: AssessmentId(model.assessment_id),
            key: RubricKey::new(model.class_name, model.name),
            points,
            feedback: model.feedback,
            task: model.task,
        })
    }
}
