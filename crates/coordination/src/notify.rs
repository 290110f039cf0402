use async_trait::async_trait;
use handoff_types::NotificationEvent;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Best-effort delivery of lifecycle events to a user.
///
/// Failures never roll back the committed state change that triggered them.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, recipient: &str, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Writes notifications to the log; the default when no push channel is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn notify(&self, recipient: &str, event: &NotificationEvent) -> Result<(), NotifyError> {
        info!(
            recipient = %recipient,
            kind = ?event.kind,
            item_id = %event.item_id,
            record_id = %event.record_id,
            "{}",
            event.kind.title()
        );
        Ok(())
    }
}

/// Keeps every notification in memory, optionally failing each delivery
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(String, NotificationEvent)>>,
    should_fail: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            should_fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<(String, NotificationEvent)> {
        self.sent.lock().await.clone()
    }

    /// Notifications delivered to one recipient
    pub async fn sent_to(&self, recipient: &str) -> Vec<NotificationEvent> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(to, _)| to == recipient)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(&self, recipient: &str, event: &NotificationEvent) -> Result<(), NotifyError> {
        if self.should_fail {
            return Err(NotifyError::DeliveryFailed(format!(
                "push channel rejected notification for {}",
                recipient
            )));
        }
        self.sent
            .lock()
            .await
            .push((recipient.to_string(), event.clone()));
        Ok(())
    }
}
