//! Client side of the API: a typed HTTP client and the local task cache it
//! mirrors successful writes into.

pub mod api;
pub mod cache;

pub use api::{ApiClient, ClientError, ClientResult};
pub use cache::{is_overdue, CachedTask, Project, TaskCache, TaskFilter};
