//! Notifications the pipeline publishes for UI refresh and other consumers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::SubmissionStatus;
use crate::entity::{AttemptId, SubmissionId};
use crate::event::Event;
use crate::hook::{Hook, HookRegistry};

pub const SUBMISSION_STATUS_CHANGED: &str = "submission_status_changed";
pub const ATTEMPT_MARKS_UPDATED: &str = "attempt_marks_updated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    SubmissionStatusChanged {
        submission_id: SubmissionId,
        status: SubmissionStatus,
    },
    AttemptMarksUpdated {
        attempt_id: AttemptId,
    },
}

impl Event for PipelineEvent {
    fn topic(&self) -> &str {
        match self {
            Self::SubmissionStatusChanged { .. } => SUBMISSION_STATUS_CHANGED,
            Self::AttemptMarksUpdated { .. } => ATTEMPT_MARKS_UPDATED,
        }
    }
}

/// Publishing side of the event bus.
///
/// Events go to registered hooks (in-process subscribers) and to a broadcast
/// channel for streaming consumers. Publishing never fails the caller:
/// subscriber errors and lagging receivers are only logged.
#[derive(Clone)]
pub struct Notifier {
    hooks: Arc<RwLock<HookRegistry>>,
    sender: broadcast::Sender<PipelineEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            hooks: Arc::new(RwLock::new(HookRegistry::new())),
            sender,
        }
    }

    pub async fn add_hook<H: Hook<PipelineEvent> + 'static>(&self, hook: H) {
        self.hooks.write().await.add_hook(hook);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub async fn publish(&self, event: PipelineEvent) {
        debug!(topic = event.topic(), ?event, "Publishing pipeline event");

        let dispatch = self.hooks.read().await.trigger(&event).await;
        for (hook_id, error) in dispatch.failures {
            warn!(hook_id = %hook_id, error = %error, "Notification hook failed");
        }

        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    pub async fn status_changed(&self, submission_id: SubmissionId, status: SubmissionStatus) {
        self.publish(PipelineEvent::SubmissionStatusChanged {
            submission_id,
            status,
        })
        .await;
    }

    pub async fn marks_updated(&self, attempt_id: AttemptId) {
        self.publish(PipelineEvent::AttemptMarksUpdated { attempt_id })
            .await;
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookAction;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StatusLog(Arc<Mutex<Vec<SubmissionStatus>>>);

    #[async_trait]
    impl Hook<PipelineEvent> for StatusLog {
        fn id(&self) -> &str {
            "status-log"
        }
        fn topics(&self) -> &[&str] {
            &[SUBMISSION_STATUS_CHANGED]
        }
        async fn on_event(&self, e: &PipelineEvent) -> anyhow::Result<HookAction> {
            if let PipelineEvent::SubmissionStatusChanged { status, .. } = e {
                self.0.lock().unwrap().push(*status);
            }
            Ok(HookAction::Pass)
        }
    }

    #[tokio::test]
    async fn hooks_only_see_their_topic() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::default();
        notifier.add_hook(StatusLog(log.clone())).await;

        notifier
            .status_changed(SubmissionId(1), SubmissionStatus::Running)
            .await;
        notifier.marks_updated(AttemptId(4)).await;

        assert_eq!(*log.lock().unwrap(), vec![SubmissionStatus::Running]);
    }

    #[tokio::test]
    async fn broadcast_receivers_get_everything() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        notifier.marks_updated(AttemptId(2)).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::AttemptMarksUpdated {
                attempt_id: AttemptId(2)
            }
        );
    }

    #[test]
    fn topics_are_stable() {
        let e = PipelineEvent::SubmissionStatusChanged {
            submission_id: SubmissionId(3),
            status: SubmissionStatus::Aborted,
        };
        assert_eq!(e.topic(), SUBMISSION_STATUS_CHANGED);
        let generic = e.to_generic_event();
        assert_eq!(generic.payload["status"], "Aborted");
        assert_eq!(PipelineEvent::from_generic_event(&generic).unwrap(), e);
    }
}
