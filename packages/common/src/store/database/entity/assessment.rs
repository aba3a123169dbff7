use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::{Assessment, AssessmentId, FileOverride};
use crate::store::StoreError;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assessment")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub name: String,

    pub due_by: Option<DateTimeUtc>,

    /// JSON array of `{path}` objects.
    #[sea_orm(column_type = "Text")]
    pub overrides: String,

    pub timeout_secs: Option<i64>,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Assessment {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, StoreError> {
        let overrides: Vec<FileOverride> = serde_json::from_str(&model.overrides)
            .map_err(|e| StoreError::Database(format!("assessment {} overrides: {e}", model.id)))?;
        Ok(Assessment {
            id: AssessmentId(model.id),
            name: model.name,
            due_by: model.due_by,
            overrides,
            timeout_secs: model.timeout_secs.and_then(|secs| u64::try_from(secs).ok()),
        })
    }
}
