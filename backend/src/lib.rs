//! Reference backing store for the task list: per-user ordered document
//! collections over HTTP, with a server-sent-events snapshot stream.

pub mod config;
pub mod docs;
pub mod hub;
pub mod repo;
pub mod routes;

pub use config::ServerConfig;
pub use repo::{DocumentRepo, MemoryRepo, RedisRepo, RepoError};
pub use routes::{router, AppState};
