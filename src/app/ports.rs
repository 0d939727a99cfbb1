use async_trait::async_trait;

use crate::domain::{Notification, User};

/// Outbound delivery of notifications (email, SMS, push).
///
/// Delivery happens after the notification is stored; a failed delivery is
/// logged and never undoes the operation that triggered it.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, recipient: &User, notification: &Notification) -> Result<(), String>;
}
