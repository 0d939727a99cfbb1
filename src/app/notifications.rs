use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::not_blank;
use super::ports::NotificationSink;
use crate::auth::Caller;
use crate::domain::{Channel, Notification, NotificationType};
use crate::error::{ApiError, Result};
use crate::storage::InMemoryStorage;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendNotificationInput {
    pub user_id: Uuid,
    #[validate(custom(function = "not_blank"), length(max = 200))]
    pub title: String,
    #[validate(custom(function = "not_blank"))]
    pub message: String,
    #[serde(default, rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub channel: Channel,
}

pub struct NotificationService<'a> {
    storage: &'a InMemoryStorage,
    sink: &'a dyn NotificationSink,
}

impl<'a> NotificationService<'a> {
    pub fn new(storage: &'a InMemoryStorage, sink: &'a dyn NotificationSink) -> Self {
        Self { storage, sink }
    }

    /// Own notifications, newest first. Elevated roles see everyone's.
    pub fn list(&self, caller: &Caller) -> Vec<Notification> {
        let mut items: Vec<Notification> = self.storage.read(|t| {
            t.notifications
                .values()
                .filter(|n| caller.is_elevated() || n.user == caller.id())
                .cloned()
                .collect()
        });
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    pub fn get(&self, caller: &Caller, id: Uuid) -> Result<Notification> {
        self.storage
            .read(|t| t.notifications.get(&id).cloned())
            .filter(|n| caller.is_elevated() || n.user == caller.id())
            .ok_or_else(|| ApiError::not_found("Notification"))
    }

    /// Only the recipient may mark a notification read.
    pub fn mark_read(&self, caller: &Caller, id: Uuid) -> Result<Notification> {
        let now = Utc::now();
        self.storage.write(|t| {
            let notification = t
                .notifications
                .get_mut(&id)
                .filter(|n| n.user == caller.id())
                .ok_or_else(|| ApiError::not_found("Notification"))?;
            notification.mark_read(now);
            Ok(notification.clone())
        })
    }

    /// Returns how many notifications changed from unread to read.
    pub fn mark_all_read(&self, caller: &Caller) -> Result<usize> {
        let now = Utc::now();
        self.storage.write(|t| {
            let marked = t
                .notifications
                .values_mut()
                .filter(|n| n.user == caller.id())
                .fold(0, |count, n| if n.mark_read(now) { count + 1 } else { count });
            Ok(marked)
        })
    }

    pub fn unread(&self, caller: &Caller) -> Vec<Notification> {
        let mut items: Vec<Notification> = self.storage.read(|t| {
            t.notifications
                .values()
                .filter(|n| n.user == caller.id() && !n.is_read)
                .cloned()
                .collect()
        });
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    pub fn unread_count(&self, caller: &Caller) -> usize {
        self.storage.read(|t| {
            t.notifications
                .values()
                .filter(|n| n.user == caller.id() && !n.is_read)
                .count()
        })
    }

    pub async fn send(&self, caller: &Caller, input: SendNotificationInput) -> Result<Notification> {
        caller.require_elevated()?;
        input.validate()?;
        if !self.storage.read(|t| t.users.contains_key(&input.user_id)) {
            return Err(ApiError::not_found("User"));
        }
        let notification = Notification::new(
            input.user_id,
            input.notification_type,
            input.channel,
            input.title.trim(),
            input.message.trim(),
        );
        self.deliver(notification).await
    }

    /// Store a notification for `user` and hand it to the sink.
    pub async fn notify(
        &self,
        user: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Notification> {
        let notification = Notification::new(user, notification_type, Channel::default(), title, message);
        self.deliver(notification).await
    }

    async fn deliver(&self, notification: Notification) -> Result<Notification> {
        let recipient = self.storage.write(|t| {
            let recipient = t
                .users
                .get(&notification.user)
                .cloned()
                .ok_or_else(|| ApiError::not_found("User"))?;
            t.notifications.insert(notification.id, notification.clone());
            Ok::<_, ApiError>(recipient)
        })?;

        match self.sink.deliver(&recipient, &notification).await {
            Ok(()) => info!(notification_id = %notification.id, "Notification delivered"),
            Err(e) => warn!(notification_id = %notification.id, "Notification delivery failed: {}", e),
        }
        Ok(notification)
    }
}
