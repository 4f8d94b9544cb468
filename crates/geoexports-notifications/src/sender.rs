use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::adapters::{EmailAdapter, EmailConfig};
use crate::error::NotificationError;
use crate::templates::TemplateRenderer;
use crate::types::ExportNotification;

/// Delivers export outcome messages.
///
/// Called once per finished job; implementations must not retry on their own.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &ExportNotification) -> Result<(), NotificationError>;
}

pub type DynNotificationSender = Arc<dyn NotificationSender>;

/// Renders the outcome templates and sends them by email.
#[derive(Debug)]
pub struct EmailNotificationSender {
    adapter: EmailAdapter,
    templates: TemplateRenderer,
}

impl EmailNotificationSender {
    pub fn new(adapter: EmailAdapter, templates: TemplateRenderer) -> Self {
        Self { adapter, templates }
    }

    pub fn from_config(config: EmailConfig) -> Result<Self, NotificationError> {
        Ok(Self::new(EmailAdapter::new(config)?, TemplateRenderer::with_defaults()))
    }
}

#[async_trait]
impl NotificationSender for EmailNotificationSender {
    #[instrument(skip_all, fields(export_id = notification.export_id, template = notification.template_id()))]
    async fn send(&self, notification: &ExportNotification) -> Result<(), NotificationError> {
        let content = self.templates.render_notification(notification)?;
        let result = self.adapter.send(&notification.recipient, &content).await?;
        info!(external_id = ?result.external_id, "export notification sent");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
///
/// Used when no email provider is configured.
#[derive(Debug, Default)]
pub struct LogNotificationSender {
    templates: TemplateRenderer,
}

impl LogNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, notification: &ExportNotification) -> Result<(), NotificationError> {
        let content = self.templates.render_notification(notification)?;
        info!(
            recipient = %notification.recipient,
            export_id = notification.export_id,
            subject = content.subject.as_deref().unwrap_or_default(),
            body = %content.body,
            "export notification (log transport)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExportOutcome;

    #[tokio::test]
    async fn test_log_sender_renders_message() {
        let sender = LogNotificationSender::new();
        let notification = ExportNotification::new(
            "ana@example.org",
            4,
            "Sites",
            "csv",
            ExportOutcome::Failed { reason: "timed out".into() },
        );
        assert!(sender.send(&notification).await.is_ok());
    }

    #[tokio::test]
    async fn test_email_sender_reports_missing_provider() {
        let sender = EmailNotificationSender::from_config(EmailConfig::default()).unwrap();
        let notification = ExportNotification::new(
            "ana@example.org",
            4,
            "Sites",
            "csv",
            ExportOutcome::Succeeded { location: "http://x/f.csv".into(), row_count: 1 },
        );
        assert!(matches!(
            sender.send(&notification).await,
            Err(NotificationError::InvalidConfig(_))
        ));
    }
}
