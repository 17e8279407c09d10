pub mod chat;
pub mod membership;
pub mod rbac;
