pub mod auth;
pub mod groups;
pub mod metrics;
pub mod tasks;
