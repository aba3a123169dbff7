use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SubmissionId, UserId};
use crate::SubmissionStatus;
use crate::storage::BlobKey;

/// One uploaded ZIP archive and the state of its build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    /// Where the archive bytes live in blob storage.
    pub archive: BlobKey,
    /// Whose work this is.
    pub author_id: UserId,
    /// Who uploaded it; differs from the author when staff upload on a student's behalf.
    pub submitter_id: UserId,
    pub status: SubmissionStatus,
    /// Exit code of the last finished build.
    pub exit_code: Option<i32>,
    /// Hex SHA-256 of the archive. `None` until the checksum job has run.
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewSubmission {
    pub archive: BlobKey,
    pub author_id: UserId,
    pub submitter_id: UserId,
}

impl NewSubmission {
    pub fn new(archive: BlobKey, author_id: UserId, submitter_id: UserId) -> Self {
        Self {
            archive,
            author_id,
            submitter_id,
        }
    }
}
