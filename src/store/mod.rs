//! SQLite-backed repositories. Plain records in, plain records out.
//!
//! Read paths take `&self` and use the pool. Writes that must commit together
//! take a `&mut SqliteConnection` so callers can run them inside one transaction.

pub mod channels;
pub mod membership;
pub mod permissions;

pub use channels::ChannelStore;
pub use membership::MembershipStore;
pub use permissions::{EffectSource, PermissionEffect, PermissionStore};
