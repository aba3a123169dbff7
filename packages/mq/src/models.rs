use std::future::Future;
use std::sync::Arc;

pub use broccoli_queue::{
    brokers::broker::BrokerMessage,
    error::BroccoliError,
    queue::{BroccoliQueue, ConsumeOptions},
};
use common::mq::{Message, MessageEnvelope};
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::MqError;
use crate::local::LocalQueue;

pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
}

pub async fn init_mq(config: MqConfig) -> Result<MqQueue, MqError> {
    let queue = BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .build()
        .await
        .map_err(MqError::from)?;
    Ok(MqQueue::with_backend(Backend::Broccoli(Arc::new(queue))))
}

/// A delivered message.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub task_id: String,
    pub payload: T,
    /// Unix timestamp in milliseconds.
    pub enqueued_at: i64,
}

#[derive(Clone)]
enum Backend {
    Broccoli(Arc<BroccoliQueue>),
    Local(LocalQueue),
}

/// Queue handle shared by publishers and consumers.
///
/// Messages travel as JSON [`MessageEnvelope`]s on either backend: the
/// broccoli queue (Redis), or the in-process queue from [`MqQueue::local`]
/// that tests run against.
#[derive(Clone)]
pub struct MqQueue {
    backend: Backend,
    shutdown: Arc<watch::Sender<bool>>,
}

impl MqQueue {
    fn with_backend(backend: Backend) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            backend,
            shutdown: Arc::new(shutdown),
        }
    }

    /// In-process queue buffering `capacity` messages per queue name.
    pub fn local(capacity: usize) -> Self {
        Self::with_backend(Backend::Local(LocalQueue::new(capacity)))
    }

    pub async fn publish<M: Message>(&self, queue_name: &str, message: &M) -> Result<(), MqError> {
        if *self.shutdown.borrow() {
            return Err(MqError::Closed(queue_name.to_string()));
        }

        let envelope = MessageEnvelope::from_message(message)?;
        match &self.backend {
            Backend::Broccoli(queue) => {
                queue.publish(queue_name, None, &envelope, None).await?;
                Ok(())
            }
            Backend::Local(queue) => queue.publish(queue_name, envelope).await,
        }
    }

    /// Consume `queue_name` until [`shutdown`](Self::shutdown), running at most
    /// `concurrency` handlers at once (default 1).
    ///
    /// A failing handler does not stop the loop. The broccoli backend reports
    /// the failure to the broker, which applies its retry policy; the local
    /// backend logs it and moves on.
    pub async fn process_messages<M, F, Fut>(
        &self,
        queue_name: &str,
        concurrency: Option<usize>,
        handler: F,
    ) -> Result<(), MqError>
    where
        M: Message + 'static,
        F: Fn(Delivery<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MqError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut shutdown = self.shutdown.subscribe();

        match &self.backend {
            Backend::Broccoli(queue) => {
                info!(queue = queue_name, "Consuming messages");
                let consume = queue.process_messages(
                    queue_name,
                    concurrency,
                    None,
                    move |message: BrokerMessage<MessageEnvelope>| {
                        let handler = Arc::clone(&handler);
                        async move {
                            deliver(message.payload, handler)
                                .await
                                .map_err(|e| BroccoliError::Job(e.to_string()))
                        }
                    },
                );
                tokio::select! {
                    result = consume => result.map_err(MqError::from),
                    _ = shutdown.wait_for(|stop| *stop) => {
                        info!(queue = queue_name, "Consumer stopped");
                        Ok(())
                    }
                }
            }
            Backend::Local(queue) => {
                let name = queue_name.to_string();
                queue
                    .process_messages(queue_name, concurrency.unwrap_or(1), shutdown, move |envelope| {
                        let handler = Arc::clone(&handler);
                        let name = name.clone();
                        async move {
                            let task_id = envelope.message_id.clone();
                            if let Err(e) = deliver(envelope, handler).await {
                                error!(queue = %name, %task_id, error = %e, "Message handler failed");
                            }
                        }
                    })
                    .await
            }
        }
    }

    /// Wait until every message published to `queue_name` has been handled,
    /// including messages published by handlers along the way.
    ///
    /// Only the local backend can observe this; broccoli returns
    /// [`MqError::Unsupported`].
    pub async fn wait_idle(&self, queue_name: &str) -> Result<(), MqError> {
        match &self.backend {
            Backend::Broccoli(_) => Err(MqError::Unsupported("waiting for an idle queue")),
            Backend::Local(queue) => {
                queue.wait_idle(queue_name).await;
                Ok(())
            }
        }
    }

    /// Stop all consumers and reject further publishes.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn deliver<M, F, Fut>(envelope: MessageEnvelope, handler: Arc<F>) -> Result<(), MqError>
where
    M: Message,
    F: Fn(Delivery<M>) -> Fut,
    Fut: Future<Output = Result<(), MqError>>,
{
    let task_id = envelope.message_id.clone();
    let enqueued_at = envelope.enqueued_at;
    let payload = envelope.into_message::<M>()?;
    handler(Delivery {
        task_id,
        payload,
        enqueued_at,
    })
    .await
}
