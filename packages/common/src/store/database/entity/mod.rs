//! Tables behind [`DatabaseStore`](super::DatabaseStore). Relations are
//! plain id columns; cascades are done by the store.

pub mod assessment;
pub mod assessment_attempt;
pub mod model_solution;
pub mod model_solution_counter;
pub mod result_artifact;
pub mod rubric_entry;
pub mod submission;

use crate::storage::BlobKey;
use crate::store::StoreError;

pub(super) fn blob_key(value: String) -> Result<BlobKey, StoreError> {
    BlobKey::new(value).map_err(|e| StoreError::Database(e.to_string()))
}

pub(super) fn unsigned(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Database(format!("negative {column}: {value}")))
}

pub(super) fn signed(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Validation(format!("{column} {value} is too large")))
}
