pub mod app;
pub mod authz;
pub mod cache;
pub mod chat;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod models;
pub mod seed;
pub mod store;

// Re-export commonly used items for tests
pub use app::{create_core, AuthzCore};
pub use authz::{AccessRequest, PermissionResolver};
pub use config::AuthzConfig;
pub use errors::{AppError, AppResult};
