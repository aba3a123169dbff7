#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;
use serde::{Deserialize, Serialize};

use super::{ArtifactId, SubmissionId};
use crate::storage::BlobKey;

/// What produced a result artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "stdout"))]
    Stdout,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "stderr"))]
    Stderr,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "junit"))]
    Junit,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "coverage"))]
    Coverage,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "mutation"))]
    Mutation,
}

impl ArtifactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Junit => "junit",
            Self::Coverage => "coverage",
            Self::Mutation => "mutation",
        }
    }
}

impl std::fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file produced by a build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub id: ArtifactId,
    pub submission_id: SubmissionId,
    pub source: ArtifactSource,
    /// Path relative to the build root (or the fixed name for stdout/stderr).
    pub path: String,
    /// Stored bytes are gzip-compressed.
    pub compressed: bool,
    pub mime_type: String,
    pub blob: BlobKey,
    /// Size of the uncompressed content.
    pub size: u64,
}

#[derive(Clone, Debug)]
pub struct NewResultArtifact {
    pub source: ArtifactSource,
    pub path: String,
    pub compressed: bool,
    pub mime_type: String,
    pub blob: BlobKey,
    pub size: u64,
}
