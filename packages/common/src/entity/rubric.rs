use serde::{Deserialize, Serialize};

use super::{AssessmentId, RubricEntryId};
use crate::Points;

/// `(class name, test name)` pair identifying a test case.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RubricKey {
    pub class_name: String,
    pub name: String,
}

impl RubricKey {
    pub fn new(class_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RubricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.class_name, self.name)
    }
}

/// Points and feedback for one test of an assessment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricEntry {
    pub id: RubricEntryId,
    pub assessment_id: AssessmentId,
    pub key: RubricKey,
    pub points: Points,
    /// Shown for failed or missing tests. `{class}` and `{test}` are substituted.
    pub feedback: String,
    /// Optional task this test belongs to, for grouped feedback.
    pub task: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewRubricEntry {
    pub key: RubricKey,
    pub points: Points,
    pub feedback: String,
    pub task: Option<String>,
}

impl NewRubricEntry {
    /// A freshly discovered test, worth nothing until an instructor weighs it.
    pub fn unweighted(key: RubricKey) -> Self {
        Self {
            key,
            points: Points::zero(),
            feedback: String::new(),
            task: None,
        }
    }
}
