use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{AuthError, StoreError};
use crate::gateway::TaskGateway;
use crate::http::HttpStore;
use crate::identity::{AuthUser, IdentityProvider, Session};
use crate::notify::{NotificationContent, NotificationScheduler, PermissionStatus};
use crate::reminder::ReminderScheduler;
use crate::store::BackingStore;
use crate::sync::{ListSynchronizer, TaskListView};

/// Wires the session, the list synchronizer, the gateway and reminders
/// together and keeps the task list following whoever is signed in.
pub struct App {
    config: ClientConfig,
    session: Session,
    sync: Arc<ListSynchronizer>,
    gateway: TaskGateway,
    reminders: Arc<ReminderScheduler>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    pub fn new(
        config: ClientConfig,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn BackingStore>,
        notifications: Arc<dyn NotificationScheduler>,
    ) -> Self {
        let session = Session::new(identity);
        let reminders =
            Arc::new(ReminderScheduler::new(notifications).with_grace(config.reminder_grace));
        let gateway = TaskGateway::new(Arc::clone(&store), Arc::clone(&reminders), session.clone())
            .with_rules(config.rules)
            .with_zone(config.input_zone);

        Self {
            sync: Arc::new(ListSynchronizer::new(store)),
            config,
            session,
            gateway,
            reminders,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Same as [`App::new`] with the task backend at `config.backend_url`.
    pub fn over_http(
        config: ClientConfig,
        identity: Arc<dyn IdentityProvider>,
        notifications: Arc<dyn NotificationScheduler>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(HttpStore::new(&config.backend_url)?);
        Ok(Self::new(config, identity, store, notifications))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn gateway(&self) -> &TaskGateway {
        &self.gateway
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    pub fn tasks(&self) -> watch::Receiver<TaskListView> {
        self.sync.watch()
    }

    /// Prepares notifications, then follows auth changes: a signed-in user
    /// gets their task list subscribed, signing out releases it.
    pub async fn start(&self) -> PermissionStatus {
        let permission = self.reminders.prepare().await;

        let received = tokio::spawn(log_received(self.reminders.received()));
        let mut changes = self.session.changes();
        let current = changes.borrow_and_update().clone();
        follow(&self.sync, current);
        let auth = tokio::spawn(follow_auth(Arc::clone(&self.sync), changes));

        self.background.lock().extend([received, auth]);
        info!(?permission, "task list app started");
        permission
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.sync.unsubscribe();
        self.session.sign_out().await
    }

    /// The subscription is released before the account goes away. If the
    /// provider refuses, the list comes back for the still signed-in user.
    pub async fn delete_account(&self) -> Result<(), AuthError> {
        self.sync.unsubscribe();
        let result = self.session.delete_account().await;
        if result.is_err() {
            follow(&self.sync, self.session.current_user());
        }
        result
    }

    pub fn shutdown(&self) {
        for task in self.background.lock().drain(..) {
            task.abort();
        }
        self.sync.unsubscribe();
        info!("task list app stopped");
    }
}

impl Drop for App {
    fn drop(&mut self) {
        for task in self.background.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn follow(sync: &ListSynchronizer, user: Option<AuthUser>) {
    match user {
        Some(user) => sync.subscribe(user.uid),
        None => sync.unsubscribe(),
    }
}

async fn follow_auth(sync: Arc<ListSynchronizer>, mut changes: watch::Receiver<Option<AuthUser>>) {
    while changes.changed().await.is_ok() {
        let user = changes.borrow_and_update().clone();
        debug!(signed_in = user.is_some(), "auth state changed");
        follow(&sync, user);
    }
}

async fn log_received(mut received: broadcast::Receiver<NotificationContent>) {
    loop {
        match received.recv().await {
            Ok(content) => info!(title = %content.title, body = %content.body, "reminder delivered"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "foreground notification listener fell behind")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryIdentity, InMemoryNotifications, InMemoryStore};
    use crate::sync::ListPhase;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn wait_phase(rx: &mut watch::Receiver<TaskListView>, phase: ListPhase) {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|v| v.phase == phase))
            .await
            .expect("timed out waiting for the task list")
            .expect("view sender dropped");
    }

    #[tokio::test]
    async fn the_list_follows_sign_in_and_sign_out() {
        let identity = Arc::new(InMemoryIdentity::new());
        identity.add_account("Ana", "ana@example.com", "secret1");
        let store = InMemoryStore::new();
        let app = App::new(
            ClientConfig::default(),
            identity.clone(),
            Arc::new(store.clone()),
            Arc::new(InMemoryNotifications::granted()),
        );
        assert_eq!(app.start().await, PermissionStatus::Granted);

        let mut tasks = app.tasks();
        assert_eq!(tasks.borrow().phase, ListPhase::NotSubscribed);

        identity
            .sign_in_with_password("ana@example.com", "secret1")
            .await
            .unwrap();
        wait_phase(&mut tasks, ListPhase::Ready).await;
        assert_eq!(store.listener_count(), 1);

        app.sign_out().await.unwrap();
        assert_eq!(app.tasks().borrow().phase, ListPhase::NotSubscribed);
        assert_eq!(store.listener_count(), 0);
        app.shutdown();
    }

    #[tokio::test]
    async fn failed_account_deletion_keeps_the_list() {
        struct Stubborn(InMemoryIdentity);

        #[async_trait::async_trait]
        impl IdentityProvider for Stubborn {
            fn current_user(&self) -> Option<AuthUser> {
                self.0.current_user()
            }
            fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
                self.0.watch()
            }
            async fn sign_in_with_password(&self, e: &str, p: &str) -> Result<AuthUser, AuthError> {
                self.0.sign_in_with_password(e, p).await
            }
            async fn sign_in_with_google(&self, t: &str) -> Result<AuthUser, AuthError> {
                self.0.sign_in_with_google(t).await
            }
            async fn sign_up(&self, n: &str, e: &str, p: &str) -> Result<AuthUser, AuthError> {
                self.0.sign_up(n, e, p).await
            }
            async fn send_password_reset(&self, e: &str) -> Result<(), AuthError> {
                self.0.send_password_reset(e).await
            }
            async fn reauthenticate(&self, p: &str) -> Result<(), AuthError> {
                self.0.reauthenticate(p).await
            }
            async fn update_password(&self, p: &str) -> Result<(), AuthError> {
                self.0.update_password(p).await
            }
            async fn delete_current_user(&self) -> Result<(), AuthError> {
                Err(AuthError::RequiresRecentLogin)
            }
            async fn sign_out(&self) -> Result<(), AuthError> {
                self.0.sign_out().await
            }
        }

        let inner = InMemoryIdentity::new();
        inner.add_account("Ana", "ana@example.com", "secret1");
        inner.sign_in_with_password("ana@example.com", "secret1").await.unwrap();
        let store = InMemoryStore::new();
        let app = App::new(
            ClientConfig::default(),
            Arc::new(Stubborn(inner)),
            Arc::new(store.clone()),
            Arc::new(InMemoryNotifications::denied()),
        );
        assert_eq!(app.start().await, PermissionStatus::Denied);

        assert_eq!(app.delete_account().await, Err(AuthError::RequiresRecentLogin));
        assert!(app.tasks().borrow().owner.is_some());
        assert_eq!(store.listener_count(), 1);
    }
}
