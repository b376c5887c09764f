//! Outbound side of the local endpoint: tunnel client and cover traffic

pub mod cover;
pub mod tunnel;

pub use cover::{ActiveRequests, CoverTicker};
pub use tunnel::TunnelClient;
