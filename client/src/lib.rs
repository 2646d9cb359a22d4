//! Client core of the per-user task list: live list synchronization, task
//! mutations, due-date reminders and the signed-in session, over pluggable
//! backing store, notification and identity collaborators.

pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod identity;
pub mod memory;
pub mod notify;
pub mod reminder;
pub mod store;
pub mod sync;

pub use app::App;
pub use config::{ClientConfig, ConfigError};
pub use error::{AuthError, Notice, NoticeLevel, ScheduleError, StoreError, TaskError};
pub use gateway::{ClearReport, Created, ReminderOutcome, TaskGateway};
pub use http::HttpStore;
pub use identity::{AuthUser, IdentityProvider, Session};
pub use notify::NotificationScheduler;
pub use reminder::ReminderScheduler;
pub use store::BackingStore;
pub use sync::{ListPhase, ListSynchronizer, TaskListView};

use tracing_subscriber::EnvFilter;

/// Installs a `RUST_LOG`-driven fmt subscriber. Does nothing if the
/// embedding app already installed one.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("client=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
