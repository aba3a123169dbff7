use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{AttemptId, ModelSolutionId, SubmissionId};
use crate::mq::Message;

/// One background job of the pipeline. Every job carries only ids and
/// re-fetches its target when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum PipelineJob {
    Build { submission_id: SubmissionId },
    Mark { attempt_id: AttemptId },
    RubricSync { model_solution_id: ModelSolutionId },
    Checksum { submission_id: SubmissionId },
}

impl PipelineJob {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Build { .. } => "build",
            Self::Mark { .. } => "mark",
            Self::RubricSync { .. } => "rubric_sync",
            Self::Checksum { .. } => "checksum",
        }
    }
}

impl std::fmt::Display for PipelineJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build { submission_id } => write!(f, "build(submission={submission_id})"),
            Self::Mark { attempt_id } => write!(f, "mark(attempt={attempt_id})"),
            Self::RubricSync { model_solution_id } => {
                write!(f, "rubric_sync(model_solution={model_solution_id})")
            }
            Self::Checksum { submission_id } => write!(f, "checksum(submission={submission_id})"),
        }
    }
}

/// Jobs run strictly one after another for one submission.
///
/// A consumer runs the head job and, if it succeeds, publishes the rest of the
/// chain as a new message. When a job fails the chain stops there and
/// `submission_id` is the submission the failure handler aborts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobChain {
    pub id: Uuid,
    pub submission_id: SubmissionId,
    pub jobs: VecDeque<PipelineJob>,
}

impl JobChain {
    pub fn new(submission_id: SubmissionId, jobs: impl IntoIterator<Item = PipelineJob>) -> Self {
        Self {
            id: Uuid::now_v7(),
            submission_id,
            jobs: jobs.into_iter().collect(),
        }
    }

    /// Build, then mark the attempt, then checksum the archive.
    pub fn attempt(submission_id: SubmissionId, attempt_id: AttemptId) -> Self {
        Self::new(
            submission_id,
            [
                PipelineJob::Build { submission_id },
                PipelineJob::Mark { attempt_id },
                PipelineJob::Checksum { submission_id },
            ],
        )
    }

    /// Build, then sync the rubric from the model solution's reports, then checksum.
    pub fn model_solution(submission_id: SubmissionId, model_solution_id: ModelSolutionId) -> Self {
        Self::new(
            submission_id,
            [
                PipelineJob::Build { submission_id },
                PipelineJob::RubricSync { model_solution_id },
                PipelineJob::Checksum { submission_id },
            ],
        )
    }

    /// Re-mark an attempt without rebuilding it.
    pub fn remark(submission_id: SubmissionId, attempt_id: AttemptId) -> Self {
        Self::new(submission_id, [PipelineJob::Mark { attempt_id }])
    }

    /// Split off the head job. Returns the job and the remaining chain, if any.
    pub fn advance(mut self) -> Option<(PipelineJob, Option<JobChain>)> {
        let job = self.jobs.pop_front()?;
        let rest = if self.jobs.is_empty() {
            None
        } else {
            Some(self)
        };
        Some((job, rest))
    }
}

impl Message for JobChain {
    fn message_type() -> &'static str {
        "job_chain"
    }

    fn message_id(&self) -> String {
        self.id.to_string()
    }
}
