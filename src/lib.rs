//! shroud - a camouflaged encrypted TCP tunnel
//!
//! A local endpoint exposes a SOCKS5 server; each CONNECT is forwarded over
//! a framed, stream-cipher-encrypted TCP session to a remote endpoint that
//! dials the real destination. When the remote endpoint receives a stream
//! that does not decode, it bridges the connection to a configured decoy
//! origin instead, so active probes see an ordinary web host.
//!
//! # Architecture
//!
//! ```text
//! client app --(SOCKS5)--> inbound::socks5 --+
//!                                            | outbound::tunnel
//!                                            v
//!                              [IV || ciphertext(framed records)]
//!                                            |
//!                                            v
//! target <--(plain TCP)-- inbound::tunnel ---+--(on decode failure)--> decoy
//! ```
//!
//! `crypto` holds the cipher registry and key derivation, `tunnel` the
//! encrypted connection wrapper and record framing, `common` the SOCKS5
//! codec and the timed duplex pipe, `outbound` the tunnel client plus the
//! cover-traffic ticker.

pub mod common;
pub mod config;
pub mod crypto;
pub mod inbound;
pub mod outbound;
pub mod tunnel;

pub use common::error::{Error, Result};
pub use config::Config;

/// Crate version reported by both binaries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
