use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AssessmentId;

/// A file always taken from the model solution, whatever the student submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOverride {
    /// Path of the entry inside the model solution archive.
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: AssessmentId,
    pub name: String,
    pub due_by: Option<DateTime<Utc>>,
    #[serde(default)]
    pub overrides: Vec<FileOverride>,
    /// Build timeout override in seconds; the worker default applies when unset.
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct NewAssessment {
    pub name: String,
    pub due_by: Option<DateTime<Utc>>,
    pub overrides: Vec<FileOverride>,
    pub timeout_secs: Option<u64>,
}

impl Assessment {
    pub fn override_paths(&self) -> Vec<String> {
        self.overrides.iter().map(|o| o.path.clone()).collect()
    }
}
