//! The job orchestrator: accepts uploads, dispatches job chains and runs them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use common::entity::{
    ArtifactId, AssessmentAttempt, AssessmentId, AttemptId, ModelSolution, ModelSolutionId,
    NewAttempt, NewSubmission, ResultArtifact, RubricEntry, RubricEntryId, StudentId, Submission,
    SubmissionId, UserId,
};
use common::notification::Notifier;
use common::pipeline_job::{JobChain, PipelineJob};
use common::storage::{BlobKey, BlobStore};
use common::store::Store;
use common::{Points, SubmissionStatus};
use mq::{Delivery, MqError, MqQueue};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::config::WorkerAppConfig;
use crate::error::PipelineError;
use crate::handlers::{self, vanished};
use crate::models::{archive, artifacts, retention};

/// An uploaded ZIP archive and who it is for.
#[derive(Debug, Clone)]
pub struct Upload {
    pub author_id: UserId,
    pub submitter_id: UserId,
    pub archive: Vec<u8>,
}

pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub mq: MqQueue,
    pub notifier: Notifier,
    pub config: Arc<WorkerAppConfig>,
    /// Serializes retention runs so two uploads cannot prune the same history at once.
    retention_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        mq: MqQueue,
        notifier: Notifier,
        config: WorkerAppConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            mq,
            notifier,
            config: Arc::new(config),
            retention_lock: Mutex::new(()),
        }
    }

    fn queue_name(&self) -> &str {
        &self.config.mq.queue_name
    }

    pub async fn enqueue(&self, chain: &JobChain) -> Result<(), PipelineError> {
        info!(chain_id = %chain.id, submission_id = %chain.submission_id, jobs = chain.jobs.len(), "Enqueueing job chain");
        self.mq.publish(self.queue_name(), chain).await?;
        Ok(())
    }

    /// Store the archive and create its submission record.
    async fn accept(&self, upload: Upload) -> Result<Submission, PipelineError> {
        let entries = archive::list_entries(&upload.archive)?;
        let key = BlobKey::generate("submissions", "archive.zip")?;
        self.blobs.put(&key, &upload.archive).await?;

        let created = self
            .store
            .create_submission(NewSubmission::new(
                key.clone(),
                upload.author_id,
                upload.submitter_id,
            ))
            .await;
        match created {
            Ok(submission) => {
                info!(submission_id = %submission.id, entries = entries.len(), "Submission accepted");
                Ok(submission)
            }
            Err(e) => {
                artifacts::discard(self.blobs.as_ref(), std::slice::from_ref(&key)).await;
                Err(e.into())
            }
        }
    }

    async fn require_assessment(&self, id: AssessmentId) -> Result<(), PipelineError> {
        match self.store.assessment(id).await? {
            Some(_) => Ok(()),
            None => Err(PipelineError::not_found("assessment", id)),
        }
    }

    /// Accept a student's attempt, start its build chain and prune the
    /// student's history.
    #[instrument(skip(self, upload), fields(%assessment_id, %student_id))]
    pub async fn submit_attempt(
        &self,
        assessment_id: AssessmentId,
        student_id: StudentId,
        upload: Upload,
    ) -> Result<AssessmentAttempt, PipelineError> {
        self.require_assessment(assessment_id).await?;
        let submission = self.accept(upload).await?;
        let attempt = self
            .store
            .create_attempt(NewAttempt {
                assessment_id,
                student_id,
                submission_id: submission.id,
            })
            .await?;
        info!(attempt_id = %attempt.id, attempt = attempt.attempt, "Attempt created");

        self.enqueue(&JobChain::attempt(submission.id, attempt.id))
            .await?;
        self.apply_retention(assessment_id, student_id).await?;
        Ok(attempt)
    }

    /// Register a new model solution version and start its build chain.
    #[instrument(skip(self, upload), fields(%assessment_id))]
    pub async fn submit_model_solution(
        &self,
        assessment_id: AssessmentId,
        upload: Upload,
    ) -> Result<ModelSolution, PipelineError> {
        self.require_assessment(assessment_id).await?;
        let submission = self.accept(upload).await?;
        let model_solution = self
            .store
            .create_model_solution(assessment_id, submission.id)
            .await?;
        info!(model_solution_id = %model_solution.id, version = model_solution.version, "Model solution registered");

        self.enqueue(&JobChain::model_solution(submission.id, model_solution.id))
            .await?;
        Ok(model_solution)
    }

    /// Build the attempt's archive again as a new attempt.
    #[instrument(skip(self), fields(%attempt_id))]
    pub async fn rerun_attempt(&self, attempt_id: AttemptId) -> Result<AssessmentAttempt, PipelineError> {
        let previous = self
            .store
            .attempt(attempt_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("attempt", attempt_id))?;
        let original = self
            .store
            .submission(previous.submission_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("submission", previous.submission_id))?;

        let submission = self
            .store
            .create_submission(NewSubmission::new(
                original.archive.clone(),
                original.author_id,
                original.submitter_id,
            ))
            .await?;
        let attempt = self
            .store
            .create_attempt(NewAttempt {
                assessment_id: previous.assessment_id,
                student_id: previous.student_id,
                submission_id: submission.id,
            })
            .await?;
        info!(new_attempt_id = %attempt.id, attempt = attempt.attempt, "Attempt rerun");

        self.enqueue(&JobChain::attempt(submission.id, attempt.id))
            .await?;
        self.apply_retention(previous.assessment_id, previous.student_id)
            .await?;
        Ok(attempt)
    }

    /// Rerun each student's latest attempt if it was built against an older
    /// model solution than the current one.
    #[instrument(skip(self), fields(%assessment_id))]
    pub async fn rerun_outdated(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AssessmentAttempt>, PipelineError> {
        let Some(latest) = self.store.latest_model_solution(assessment_id).await? else {
            return Ok(Vec::new());
        };

        let mut newest: BTreeMap<StudentId, AssessmentAttempt> = BTreeMap::new();
        for attempt in self.store.assessment_attempts(assessment_id).await? {
            match newest.get(&attempt.student_id) {
                Some(current) if current.attempt >= attempt.attempt => {}
                _ => {
                    newest.insert(attempt.student_id, attempt);
                }
            }
        }

        let mut rerun = Vec::new();
        for attempt in newest.into_values() {
            if attempt.is_outdated(Some(latest.version)) {
                rerun.push(self.rerun_attempt(attempt.id).await?);
            }
        }
        info!(rerun = rerun.len(), version = latest.version, "Outdated attempts rerun");
        Ok(rerun)
    }

    /// Publish a marking-only chain for every attempt of the assessment.
    pub async fn remark_all(&self, assessment_id: AssessmentId) -> Result<usize, PipelineError> {
        let attempts = self.store.assessment_attempts(assessment_id).await?;
        for attempt in &attempts {
            self.enqueue(&JobChain::remark(attempt.submission_id, attempt.id))
                .await?;
        }
        Ok(attempts.len())
    }

    /// Change rubric weights atomically, then re-mark every attempt.
    #[instrument(skip(self, updates), fields(%assessment_id, updates = updates.len()))]
    pub async fn update_rubric_points(
        &self,
        assessment_id: AssessmentId,
        updates: &[(RubricEntryId, Points)],
    ) -> Result<Vec<RubricEntry>, PipelineError> {
        let updated = self
            .store
            .update_rubric_points(assessment_id, updates)
            .await?;
        let remarks = self.remark_all(assessment_id).await?;
        info!(remarks, "Rubric points updated");
        Ok(updated)
    }

    /// Prune one student's attempt history. Returns the deleted attempts.
    #[instrument(skip(self), fields(%assessment_id, %student_id))]
    pub async fn apply_retention(
        &self,
        assessment_id: AssessmentId,
        student_id: StudentId,
    ) -> Result<Vec<AttemptId>, PipelineError> {
        let keep_latest = self.config.retention.keep_latest;
        if keep_latest == 0 {
            return Ok(Vec::new());
        }

        let _guard = self.retention_lock.lock().await;
        let assessment = self
            .store
            .assessment(assessment_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("assessment", assessment_id))?;
        let history = self.store.attempts(assessment_id, student_id).await?;
        let decision = retention::select(&history, assessment.due_by, keep_latest);

        for attempt in history.iter().filter(|a| decision.delete.contains(&a.id)) {
            self.discard_attempt(attempt).await?;
        }
        if !decision.delete.is_empty() {
            info!(kept = decision.keep.len(), deleted = decision.delete.len(), "Retention applied");
        }
        Ok(decision.delete)
    }

    /// Run the retention policy for every student with attempts.
    #[instrument(skip(self), fields(%assessment_id))]
    pub async fn apply_retention_for_assessment(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AttemptId>, PipelineError> {
        let students: BTreeSet<StudentId> = self
            .store
            .assessment_attempts(assessment_id)
            .await?
            .into_iter()
            .map(|a| a.student_id)
            .collect();

        let mut deleted = Vec::new();
        for student_id in students {
            deleted.extend(self.apply_retention(assessment_id, student_id).await?);
        }
        Ok(deleted)
    }

    async fn discard_attempt(&self, attempt: &AssessmentAttempt) -> Result<(), PipelineError> {
        let aborted = vanished(
            self.store
                .set_submission_status(attempt.submission_id, SubmissionStatus::Aborted, None)
                .await,
        )?;
        if aborted.is_some() {
            self.notifier
                .status_changed(attempt.submission_id, SubmissionStatus::Aborted)
                .await;
        }

        if let Some(reclaimed) = vanished(self.store.delete_attempt(attempt.id).await)? {
            artifacts::discard(self.blobs.as_ref(), &reclaimed.blobs).await;
        }
        info!(attempt_id = %attempt.id, attempt = attempt.attempt, "Attempt discarded");
        Ok(())
    }

    /// Delete an attempt with its submission. A build still running for it is
    /// stopped the next time the build is polled.
    #[instrument(skip(self), fields(%attempt_id))]
    pub async fn delete_attempt(&self, attempt_id: AttemptId) -> Result<(), PipelineError> {
        let reclaimed = self.store.delete_attempt(attempt_id).await?;
        artifacts::discard(self.blobs.as_ref(), &reclaimed.blobs).await;
        Ok(())
    }

    #[instrument(skip(self), fields(%model_solution_id))]
    pub async fn delete_model_solution(
        &self,
        model_solution_id: ModelSolutionId,
    ) -> Result<(), PipelineError> {
        let reclaimed = self.store.delete_model_solution(model_solution_id).await?;
        artifacts::discard(self.blobs.as_ref(), &reclaimed.blobs).await;
        Ok(())
    }

    /// Artifact content, decompressed if it was stored compressed.
    pub async fn artifact_content(&self, artifact: &ResultArtifact) -> Result<Vec<u8>, PipelineError> {
        let stored = self.blobs.get(&artifact.blob).await?;
        if artifact.compressed {
            Ok(artifacts::decompress(&stored)?)
        } else {
            Ok(stored)
        }
    }

    pub async fn read_artifact(
        &self,
        artifact_id: ArtifactId,
    ) -> Result<(ResultArtifact, Vec<u8>), PipelineError> {
        let artifact = self
            .store
            .artifact(artifact_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("artifact", artifact_id))?;
        let content = self.artifact_content(&artifact).await?;
        Ok((artifact, content))
    }

    async fn run_job(&self, job: PipelineJob) -> Result<(), PipelineError> {
        match job {
            PipelineJob::Build { submission_id } => handlers::build::handle_build(self, submission_id).await,
            PipelineJob::Mark { attempt_id } => handlers::mark::handle_mark(self, attempt_id).await,
            PipelineJob::RubricSync { model_solution_id } => {
                handlers::rubric_sync::handle_rubric_sync(self, model_solution_id).await
            }
            PipelineJob::Checksum { submission_id } => {
                handlers::checksum::handle_checksum(self, submission_id).await
            }
        }
    }

    /// Run the head job of `chain` and publish the rest if it succeeds.
    ///
    /// A failing job ends the chain: its submission is forced to `Aborted`
    /// and a status change is published.
    #[instrument(skip(self, chain), fields(chain_id = %chain.id, submission_id = %chain.submission_id))]
    pub async fn handle_chain(&self, chain: JobChain) -> Result<(), PipelineError> {
        let chain_id = chain.id;
        let submission_id = chain.submission_id;
        let Some((job, rest)) = chain.advance() else {
            return Ok(());
        };

        match self.run_job(job).await {
            Ok(()) => {
                if let Some(rest) = rest {
                    self.enqueue(&rest).await?;
                }
                Ok(())
            }
            Err(e) => {
                error!(%chain_id, %submission_id, job = %job, error = %e, "Job failed, aborting chain");
                self.abort(submission_id).await;
                Ok(())
            }
        }
    }

    async fn abort(&self, submission_id: SubmissionId) {
        match self
            .store
            .set_submission_status(submission_id, SubmissionStatus::Aborted, None)
            .await
        {
            Ok(_) => {
                self.notifier
                    .status_changed(submission_id, SubmissionStatus::Aborted)
                    .await;
            }
            Err(e) if e.is_not_found() => {
                info!(%submission_id, "Submission already deleted, nothing to abort");
            }
            Err(e) => {
                error!(%submission_id, error = %e, "Failed to mark submission aborted");
            }
        }
    }

    /// Consume job chains until the queue is shut down.
    pub async fn run(self: Arc<Self>) -> Result<(), MqError> {
        let queue = self.queue_name().to_string();
        let concurrency = self.config.worker.concurrency;
        let pipeline = Arc::clone(&self);

        self.mq
            .process_messages(&queue, Some(concurrency), move |message: Delivery<JobChain>| {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    pipeline
                        .handle_chain(message.payload)
                        .await
                        .map_err(|e| MqError::Internal(e.to_string()))
                }
            })
            .await
    }

    /// Wait until every published chain has run to completion. Needs a
    /// broker that can observe this, see [`MqQueue::wait_idle`].
    pub async fn wait_idle(&self) -> Result<(), PipelineError> {
        self.mq.wait_idle(self.queue_name()).await?;
        Ok(())
    }

    /// Stop consuming. Further enqueues fail.
    pub fn shutdown(&self) {
        warn!("Pipeline shutting down");
        self.mq.shutdown();
    }
}
