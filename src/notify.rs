use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::events::EngineEvent;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Outbound operator notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str, attachment: Option<&Attachment>) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, body: &str, attachment: Option<&Attachment>) -> Result<()> {
        tracing::info!(
            attachment = attachment.map(|a| a.filename.as_str()),
            "🔔 {}: {}",
            title,
            body
        );
        Ok(())
    }
}

/// Forward notable engine events to a notifier until the bus closes
pub async fn run_notifier(mut rx: broadcast::Receiver<EngineEvent>, notifier: Box<dyn Notifier>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if !event.is_notable() {
                    continue;
                }
                if let Err(e) = notifier.notify(&event.title(), &event.body(), None).await {
                    tracing::warn!(error = %e, "Notification failed");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Notifier lagged behind event bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
