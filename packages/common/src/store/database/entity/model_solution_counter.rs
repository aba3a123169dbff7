use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Highest model solution version issued per assessment. Outlives deleted
/// model solutions so versions are never reused.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "model_solution_counter")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub assessment_id: i64,

    pub latest: i32,
}

impl ActiveModelBehavior for ActiveModel {}
