use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::ScheduleError;
use crate::notify::{
    ChannelSpec, NotificationContent, NotificationId, NotificationScheduler, PermissionStatus,
    ScheduledNotification,
};

struct State {
    status: PermissionStatus,
    answer: PermissionStatus,
    requests: usize,
    channels: Vec<ChannelSpec>,
    scheduled: Vec<ScheduledNotification>,
    next_id: u64,
    failure: Option<ScheduleError>,
    schedule_calls: usize,
}

/// A notification scheduler that keeps pending notifications in a list and
/// "delivers" them when told the time has come.
pub struct InMemoryNotifications {
    state: Mutex<State>,
    received: broadcast::Sender<NotificationContent>,
}

impl InMemoryNotifications {
    /// Starts with `status`; a permission request turns it into `answer`.
    pub fn new(status: PermissionStatus, answer: PermissionStatus) -> Self {
        let (received, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(State {
                status,
                answer,
                requests: 0,
                channels: Vec::new(),
                scheduled: Vec::new(),
                next_id: 1,
                failure: None,
                schedule_calls: 0,
            }),
            received,
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted, PermissionStatus::Granted)
    }

    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied, PermissionStatus::Denied)
    }

    /// Undetermined until asked, then `answer`.
    pub fn answering(answer: PermissionStatus) -> Self {
        Self::new(PermissionStatus::Undetermined, answer)
    }

    pub fn fail_with(&self, failure: Option<ScheduleError>) {
        self.state.lock().failure = failure;
    }

    pub fn permission_requests(&self) -> usize {
        self.state.lock().requests
    }

    pub fn schedule_calls(&self) -> usize {
        self.state.lock().schedule_calls
    }

    pub fn channels(&self) -> Vec<ChannelSpec> {
        self.state.lock().channels.clone()
    }

    /// Delivers every notification due at `now`, in fire order.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<NotificationContent> {
        let mut state = self.state.lock();
        let (mut due, pending): (Vec<_>, Vec<_>) =
            state.scheduled.drain(..).partition(|n| n.fire_at <= now);
        state.scheduled = pending;
        due.sort_by_key(|n| n.fire_at);

        due.into_iter()
            .map(|n| {
                let _ = self.received.send(n.content.clone());
                n.content
            })
            .collect()
    }
}

#[async_trait]
impl NotificationScheduler for InMemoryNotifications {
    async fn permission_status(&self) -> Result<PermissionStatus, ScheduleError> {
        Ok(self.state.lock().status)
    }

    async fn request_permission(&self) -> Result<PermissionStatus, ScheduleError> {
        let mut state = self.state.lock();
        state.requests += 1;
        state.status = state.answer;
        Ok(state.status)
    }

    async fn ensure_channel(&self, channel: &ChannelSpec) -> Result<(), ScheduleError> {
        let mut state = self.state.lock();
        if !state.channels.iter().any(|c| c.id == channel.id) {
            state.channels.push(channel.clone());
        }
        Ok(())
    }

    async fn schedule(
        &self,
        content: NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, ScheduleError> {
        let mut state = self.state.lock();
        state.schedule_calls += 1;
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        if state.status != PermissionStatus::Granted {
            return Err(ScheduleError::PermissionDenied);
        }

        let id = NotificationId(format!("local-{}", state.next_id));
        state.next_id += 1;
        state.scheduled.push(ScheduledNotification {
            id: id.clone(),
            content,
            fire_at,
        });
        Ok(id)
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledNotification>, ScheduleError> {
        Ok(self.state.lock().scheduled.clone())
    }

    async fn cancel_all(&self) -> Result<(), ScheduleError> {
        self.state.lock().scheduled.clear();
        Ok(())
    }

    fn received(&self) -> broadcast::Receiver<NotificationContent> {
        self.received.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn due_notifications_are_delivered_to_foreground_listeners() {
        let platform = InMemoryNotifications::granted();
        let mut received = platform.received();
        let nine = Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap();
        let ten = Utc.with_ymd_and_hms(2030, 1, 1, 10, 0, 0).unwrap();

        for (title, at) in [("later", ten), ("sooner", nine)] {
            let content = NotificationContent {
                title: title.into(),
                body: "b".into(),
            };
            platform.schedule(content, at).await.unwrap();
        }

        let fired = platform.fire_due(nine);
        assert_eq!(fired.len(), 1);
        assert_eq!(received.recv().await.unwrap().title, "sooner");
        assert_eq!(platform.list_scheduled().await.unwrap().len(), 1);
    }
}
