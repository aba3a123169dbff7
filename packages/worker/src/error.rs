use common::storage::StorageError;
use common::store::StoreError;
use mq::MqError;
use thiserror::Error;

use crate::models::archive::ArchiveError;
use crate::models::build::BuildError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] MqError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
