use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::blob_key;
use crate::entity::{ArtifactId, ArtifactSource, ResultArtifact, SubmissionId};
use crate::store::StoreError;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "result_artifact")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub submission_id: i64,

    pub source: ArtifactSource,

    #[sea_orm(column_type = "Text")]
    pub path: String,

    pub compressed: bool,

    pub mime_type: String,

    pub blob: String,

    /// Uncompressed size in bytes.
    pub size: i64,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for ResultArtifact {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, StoreError> {
        let size = u64::try_from(model.size)
            .map_err(|_| StoreError::Database(format!("artifact {} has negative size", model.id)))?;
        Ok(ResultArtifact {
            id: ArtifactId(model.id),
            submission_id: SubmissionId(model.submission_id),
            source: model.source,
            path: model.path,
            compressed: model.compressed,
            mime_type: model.mime_type,
            blob: blob_key(model.blob)?,
            size,
        })
    }
}
