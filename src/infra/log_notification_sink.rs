use async_trait::async_trait;
use tracing::info;

use crate::app::ports::NotificationSink;
use crate::domain::{Notification, User};

/// Delivery adapter that writes notifications to the log instead of an
/// external provider. Used in development and when no provider is set up.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, recipient: &User, notification: &Notification) -> Result<(), String> {
        info!(
            notification_id = %notification.id,
            channel = ?notification.channel,
            to = %recipient.email,
            "Delivering notification: {}",
            notification.title
        );
        Ok(())
    }
}
