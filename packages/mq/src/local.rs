//! In-process broker backing [`MqQueue::local`](crate::MqQueue::local).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::mq::MessageEnvelope;
use tokio::sync::{Mutex, Notify, Semaphore, mpsc, watch};
use tracing::{debug, info};

use crate::error::MqError;

struct NamedQueue {
    tx: mpsc::Sender<MessageEnvelope>,
    rx: Mutex<mpsc::Receiver<MessageEnvelope>>,
    /// Published but not yet fully handled.
    in_flight: AtomicUsize,
    idle: Notify,
}

impl NamedQueue {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn finish(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Named FIFO queues living in this process.
#[derive(Clone)]
pub(crate) struct LocalQueue {
    capacity: usize,
    queues: Arc<Mutex<HashMap<String, Arc<NamedQueue>>>>,
}

impl LocalQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn queue(&self, name: &str) -> Arc<NamedQueue> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(NamedQueue::new(self.capacity)))
            .clone()
    }

    pub(crate) async fn publish(&self, queue_name: &str, envelope: MessageEnvelope) -> Result<(), MqError> {
        let queue = self.queue(queue_name).await;
        debug!(queue = queue_name, message_id = %envelope.message_id, "Publishing message");
        queue.in_flight.fetch_add(1, Ordering::AcqRel);
        if queue.tx.send(envelope).await.is_err() {
            queue.finish();
            return Err(MqError::Closed(queue_name.to_string()));
        }
        Ok(())
    }

    /// Hand envelopes to `handler` until `shutdown` flips, with at most
    /// `concurrency` handlers running. Running handlers are awaited before
    /// returning.
    pub(crate) async fn process_messages<F, Fut>(
        &self,
        queue_name: &str,
        concurrency: usize,
        mut shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<(), MqError>
    where
        F: Fn(MessageEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let queue = self.queue(queue_name).await;
        let limit = concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let handler = Arc::new(handler);

        info!(queue = queue_name, concurrency = limit, "Consuming messages");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| MqError::Internal(e.to_string()))?
                }
                _ = shutdown.changed() => break,
            };

            let envelope = {
                let mut rx = queue.rx.lock().await;
                tokio::select! {
                    envelope = rx.recv() => envelope,
                    _ = shutdown.changed() => break,
                }
            };
            let Some(envelope) = envelope else {
                break;
            };

            let queue = queue.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                handler(envelope).await;
                queue.finish();
            });
        }

        // Every permit back means no handler is running.
        let _ = semaphore.acquire_many(limit as u32).await;
        info!(queue = queue_name, "Consumer stopped");
        Ok(())
    }

    /// Wait until every message published to `queue_name` has been handled,
    /// including messages published by handlers along the way.
    pub(crate) async fn wait_idle(&self, queue_name: &str) {
        let queue = self.queue(queue_name).await;
        loop {
            let notified = queue.idle.notified();
            if queue.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}
