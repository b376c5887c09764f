//! Encrypted tunnel core: connection wrapper and framed record protocol

pub mod conn;
pub mod protocol;

pub use conn::TunnelStream;
pub use protocol::{Traffic, TrafficKind};
