//! Status notification seam for compaction progress.
//!
//! The coordinator reports stage transitions through `StatusNotifier`.
//! Notification is fire-and-forget: implementations swallow their own
//! delivery failures and must never propagate errors back into the
//! compaction pipeline. Rendering and delivery (chat blocks, webhooks) are
//! the implementor's concern.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusStage {
    Starting,
    Summarizing,
    Completed,
}

impl std::fmt::Display for StatusStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusStage::Starting => write!(f, "starting"),
            StatusStage::Summarizing => write!(f, "summarizing"),
            StatusStage::Completed => write!(f, "completed"),
        }
    }
}

#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, conversation_key: &str, stage: StatusStage, payload: Value);
}

/// Default notifier: logs the transition and payload.
pub struct LogNotifier;

#[async_trait]
impl StatusNotifier for LogNotifier {
    async fn notify(&self, conversation_key: &str, stage: StatusStage, payload: Value) {
        log::info!("[STATUS] {} {}: {}", conversation_key, stage, payload);
    }
}

/// One captured notification.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub conversation_key: String,
    pub stage: StatusStage,
    pub payload: Value,
}

/// Notifier that forwards events into an mpsc channel, for delivery bridges
/// and for tests asserting on stage ordering.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StatusNotifier for ChannelNotifier {
    async fn notify(&self, conversation_key: &str, stage: StatusStage, payload: Value) {
        let event = StatusEvent {
            conversation_key: conversation_key.to_string(),
            stage,
            payload,
        };
        // Receiver may be gone; a dropped status update is not an error
        if self.tx.send(event).is_err() {
            log::debug!("[STATUS] Dropped {} notification for closed channel", stage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_notifier_preserves_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify("c1", StatusStage::Starting, json!({"a": 1})).await;
        notifier.notify("c1", StatusStage::Summarizing, json!({})).await;
        notifier.notify("c1", StatusStage::Completed, json!({"done": true})).await;

        let stages: Vec<StatusStage> = [rx.recv().await, rx.recv().await, rx.recv().await]
            .into_iter()
            .map(|e| e.unwrap().stage)
            .collect();
        assert_eq!(
            stages,
            vec![StatusStage::Starting, StatusStage::Summarizing, StatusStage::Completed]
        );
    }

    #[tokio::test]
    async fn test_closed_receiver_is_swallowed() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        // Must not panic or error
        notifier.notify("c1", StatusStage::Completed, json!({})).await;
    }
}
