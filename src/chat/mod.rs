//! Chat channel access and the self-healing membership repair behind it.

mod repair;

pub use repair::{ChannelMembershipRepair, RepairFailure, RepairState, CHANNEL_ACCESS_DENIED};
