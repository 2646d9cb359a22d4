use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::ScheduleError;
use crate::notify::{
    ChannelSpec, NotificationContent, NotificationId, NotificationScheduler, PermissionStatus,
    ScheduledNotification,
};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);
pub const REMINDER_BODY: &str = "Task reminder";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant, moved by hand.
#[derive(Debug)]
pub struct FixedClock(parking_lot::Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(parking_lot::Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

/// Turns a task title and due instant into one local notification.
pub struct ReminderScheduler {
    platform: Arc<dyn NotificationScheduler>,
    clock: Arc<dyn Clock>,
    grace: chrono::Duration,
    channel: ChannelSpec,
}

impl ReminderScheduler {
    pub fn new(platform: Arc<dyn NotificationScheduler>) -> Self {
        Self {
            platform,
            clock: Arc::new(SystemClock),
            grace: chrono::Duration::seconds(DEFAULT_GRACE.as_secs() as i64),
            channel: ChannelSpec::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        if let Ok(grace) = chrono::Duration::from_std(grace) {
            self.grace = grace;
        }
        self
    }

    pub fn with_channel(mut self, channel: ChannelSpec) -> Self {
        self.channel = channel;
        self
    }

    /// When a reminder for `when` actually fires: `when` itself if it is
    /// still ahead, otherwise `now + grace`.
    pub fn fire_time(&self, when: DateTime<Utc>) -> DateTime<Utc> {
        let now = self.clock.now();
        if when > now {
            when
        } else {
            now + self.grace
        }
    }

    pub async fn schedule_reminder(
        &self,
        title: &str,
        when: DateTime<Utc>,
    ) -> Result<NotificationId, ScheduleError> {
        let fire_at = self.fire_time(when);
        if fire_at != when {
            info!(requested = %when, %fire_at, "reminder due date already passed, shifting forward");
        }
        let content = NotificationContent {
            title: title.to_string(),
            body: REMINDER_BODY.to_string(),
        };
        let id = self.platform.schedule(content, fire_at).await?;
        info!(%id, %fire_at, "reminder scheduled");
        Ok(id)
    }

    pub async fn list_pending(&self) -> Result<Vec<ScheduledNotification>, ScheduleError> {
        let pending = self.platform.list_scheduled().await?;
        info!(count = pending.len(), "pending reminders");
        Ok(pending)
    }

    pub async fn cancel_all(&self) -> Result<(), ScheduleError> {
        self.platform.cancel_all().await?;
        info!("all pending reminders cancelled");
        Ok(())
    }

    /// Startup: sets up the channel and asks for permission if needed.
    /// Never fails; a denied permission only means reminders won't show.
    pub async fn prepare(&self) -> PermissionStatus {
        if let Err(err) = self.platform.ensure_channel(&self.channel).await {
            warn!(error = %err, channel = %self.channel.id, "could not set up notification channel");
        }

        let status = match self.platform.permission_status().await {
            Ok(PermissionStatus::Granted) => PermissionStatus::Granted,
            Ok(_) => match self.platform.request_permission().await {
                Ok(status) => status,
                Err(err) => {
                    warn!(error = %err, "notification permission request failed");
                    PermissionStatus::Denied
                }
            },
            Err(err) => {
                warn!(error = %err, "could not read notification permission");
                PermissionStatus::Undetermined
            }
        };

        if status != PermissionStatus::Granted {
            warn!(?status, "notifications not permitted, reminders will not be shown");
        }
        status
    }

    pub fn received(&self) -> tokio::sync::broadcast::Receiver<NotificationContent> {
        self.platform.received()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryNotifications;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, h, m, s).unwrap()
    }

    fn scheduler(platform: Arc<InMemoryNotifications>) -> ReminderScheduler {
        ReminderScheduler::new(platform).with_clock(Arc::new(FixedClock::new(at(9, 0, 0))))
    }

    #[tokio::test]
    async fn future_instants_fire_as_requested() {
        let platform = Arc::new(InMemoryNotifications::granted());
        let reminders = scheduler(platform.clone());

        reminders.schedule_reminder("Buy milk", at(10, 0, 0)).await.unwrap();

        let pending = reminders.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fire_at, at(10, 0, 0));
        assert_eq!(pending[0].content.title, "Buy milk");
        assert_eq!(pending[0].content.body, REMINDER_BODY);
    }

    #[tokio::test]
    async fn past_and_present_instants_fire_after_the_grace_interval() {
        let platform = Arc::new(InMemoryNotifications::granted());
        let reminders = scheduler(platform.clone());

        reminders.schedule_reminder("late", at(8, 0, 0)).await.unwrap();
        reminders.schedule_reminder("now", at(9, 0, 0)).await.unwrap();

        let pending = reminders.list_pending().await.unwrap();
        assert!(pending.iter().all(|n| n.fire_at == at(9, 0, 5)));
    }

    #[tokio::test]
    async fn grace_interval_is_configurable() {
        let platform = Arc::new(InMemoryNotifications::granted());
        let reminders = scheduler(platform).with_grace(Duration::from_secs(30));
        assert_eq!(reminders.fire_time(at(1, 0, 0)), at(9, 0, 30));
    }

    #[tokio::test]
    async fn denied_permission_rejects_scheduling() {
        let platform = Arc::new(InMemoryNotifications::denied());
        let reminders = scheduler(platform);
        assert_eq!(
            reminders.schedule_reminder("x", at(10, 0, 0)).await,
            Err(ScheduleError::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn prepare_requests_permission_once_and_tolerates_denial() {
        let platform = Arc::new(InMemoryNotifications::answering(PermissionStatus::Denied));
        let reminders = scheduler(platform.clone());

        assert_eq!(reminders.prepare().await, PermissionStatus::Denied);
        assert_eq!(platform.permission_requests(), 1);
        assert_eq!(platform.channels(), vec![ChannelSpec::default()]);

        let platform = Arc::new(InMemoryNotifications::granted());
        let reminders = scheduler(platform.clone());
        assert_eq!(reminders.prepare().await, PermissionStatus::Granted);
        assert_eq!(platform.permission_requests(), 0);
    }

    #[tokio::test]
    async fn cancel_all_clears_every_pending_reminder() {
        let platform = Arc::new(InMemoryNotifications::granted());
        let reminders = scheduler(platform);
        reminders.schedule_reminder("a", at(10, 0, 0)).await.unwrap();
        reminders.schedule_reminder("b", at(11, 0, 0)).await.unwrap();

        reminders.cancel_all().await.unwrap();
        assert!(reminders.list_pending().await.unwrap().is_empty());
    }
}
