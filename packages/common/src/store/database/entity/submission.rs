use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::blob_key;
use crate::SubmissionStatus;
use crate::entity::{Submission, SubmissionId, UserId};
use crate::store::StoreError;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submission")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Blob key of the uploaded archive. Reruns share it.
    #[sea_orm(indexed)]
    pub archive: String,

    pub author_id: i64,

    pub submitter_id: i64,

    pub status: SubmissionStatus,

    pub exit_code: Option<i32>,

    pub checksum: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Submission {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, StoreError> {
        Ok(Submission {
            id: SubmissionId(model.id),
            archive: blob_key(model.archive)?,
            author_id: UserId(model.author_id),
            submitter_id: UserId(model.submitter_id),
            status: model.status,
            exit_code: model.exit_code,
            checksum: model.checksum,
            created_at: model.created_at,
        })
    }
}
