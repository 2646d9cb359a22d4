//! Process-local collaborators, used by tests and offline runs.

mod identity;
mod notify;
mod store;

pub use identity::InMemoryIdentity;
pub use notify::InMemoryNotifications;
pub use store::InMemoryStore;
