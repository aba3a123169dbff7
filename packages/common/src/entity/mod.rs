//! Records the pipeline reads and writes through the [`Store`](crate::store::Store).
//!
//! Relations are expressed as typed ids only; there are no back-pointers.

pub mod assessment;
pub mod attempt;
pub mod model_solution;
pub mod result_artifact;
pub mod rubric;
pub mod submission;

pub use assessment::{Assessment, FileOverride, NewAssessment};
pub use attempt::{AssessmentAttempt, AttemptCounts, NewAttempt};
pub use model_solution::ModelSolution;
pub use result_artifact::{ArtifactSource, NewResultArtifact, ResultArtifact};
pub use rubric::{NewRubricEntry, RubricEntry, RubricKey};
pub use submission::{NewSubmission, Submission};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifies a [`Submission`].
    SubmissionId
);
entity_id!(ArtifactId);
entity_id!(RubricEntryId);
entity_id!(AttemptId);
entity_id!(ModelSolutionId);
entity_id!(AssessmentId);
entity_id!(
    /// Identifies a student's enrolment, not a user account.
    StudentId
);
entity_id!(UserId);
