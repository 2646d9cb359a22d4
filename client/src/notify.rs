//! Contract of the platform's local-notification scheduler.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ScheduleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Default,
    High,
    Max,
}

/// Notification channel, required once on platforms that have them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub importance: Importance,
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self {
            id: "default".into(),
            name: "default".into(),
            importance: Importance::Max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub id: NotificationId,
    pub content: NotificationContent,
    pub fire_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    async fn permission_status(&self) -> Result<PermissionStatus, ScheduleError>;

    async fn request_permission(&self) -> Result<PermissionStatus, ScheduleError>;

    /// Platforms without channels accept this as a no-op.
    async fn ensure_channel(&self, _channel: &ChannelSpec) -> Result<(), ScheduleError> {
        Ok(())
    }

    async fn schedule(
        &self,
        content: NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, ScheduleError>;

    async fn list_scheduled(&self) -> Result<Vec<ScheduledNotification>, ScheduleError>;

    async fn cancel_all(&self) -> Result<(), ScheduleError>;

    /// Notifications delivered while the app is in the foreground.
    fn received(&self) -> broadcast::Receiver<NotificationContent>;
}
