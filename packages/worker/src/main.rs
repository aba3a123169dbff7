use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use common::hook::{Hook, HookAction};
use common::notification::{ATTEMPT_MARKS_UPDATED, Notifier, PipelineEvent, SUBMISSION_STATUS_CHANGED};
use common::storage::filesystem::FilesystemBlobStore;
use common::store::DatabaseStore;
use mq::{MqConfig, init_mq};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use worker::{Pipeline, WorkerAppConfig};

/// Writes every pipeline event to the log.
struct EventLog;

#[async_trait]
impl Hook<PipelineEvent> for EventLog {
    fn id(&self) -> &str {
        "event-log"
    }

    fn topics(&self) -> &[&str] {
        &[SUBMISSION_STATUS_CHANGED, ATTEMPT_MARKS_UPDATED]
    }

    async fn on_event(&self, event: &PipelineEvent) -> anyhow::Result<HookAction> {
        match event {
            PipelineEvent::SubmissionStatusChanged {
                submission_id,
                status,
            } => info!(%submission_id, status = status.as_str(), "Submission status changed"),
            PipelineEvent::AttemptMarksUpdated { attempt_id } => {
                info!(%attempt_id, "Attempt marks updated")
            }
        }
        Ok(HookAction::Pass)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!(worker_id = %config.worker.id, concurrency = config.worker.concurrency, "Worker starting");

    let blobs = FilesystemBlobStore::new(config.storage.blob_path.clone(), config.storage.max_blob_size)
        .await
        .context("Failed to initialize blob storage")?;
    let store = DatabaseStore::connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    let mq = init_mq(MqConfig {
        url: config.mq.url.clone(),
        pool_size: config.mq.pool_size,
    })
    .await
    .context("Failed to initialize MQ")?;
    info!(queue_name = %config.mq.queue_name, "MQ connected");

    let notifier = Notifier::default();
    notifier.add_hook(EventLog).await;

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(store),
        Arc::new(blobs),
        mq,
        notifier,
        config,
    ));

    let consumer = tokio::spawn(Arc::clone(&pipeline).run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    pipeline.shutdown();

    match consumer.await {
        Ok(Ok(())) => info!("Worker stopped"),
        Ok(Err(e)) => error!(error = %e, "Worker stopped unexpectedly"),
        Err(e) => error!(error = %e, "Consumer task panicked"),
    }
    Ok(())
}
