//! # basalt-net
//!
//! Framed TCP transport for the basalt p2p layer.
//!
//! This crate provides:
//! - The `host:port` endpoint grammar
//! - The tagged wire-message union and its binary codec
//! - Length-prefixed framing over a growing read buffer
//! - Resilient connections with reconnect backoff and ordered writes
//! - A connection manager with an accept loop

mod codec;
mod connection;
mod endpoint;
mod error;
mod manager;
mod message;

pub use codec::{FrameCodec, InboundFrame};
pub use connection::{ConnEvent, ConnId, Connection, WriteCallback, WritePayload};
pub use endpoint::{format_endpoint, parse_endpoint};
pub use error::{NetError, NetResult};
pub use manager::{ConnectionManager, NetConfig, NetEvent};
pub use message::{GoodbyeReason, Hello, Message, Status};

/// Default p2p port.
pub const DEFAULT_PORT: u16 = 9876;

/// Largest frame body accepted or produced.
pub const MAX_MESSAGE_LENGTH: usize = 10 * 1024 * 1024;

/// Minimum capacity of a connection's read buffer.
pub const READ_BUFFER_MIN: usize = 1024 * 1024;

/// Base reconnect delay in seconds.
pub const BACKOFF_BASE_SECS: u64 = 1;

/// Ceiling on the reconnect delay in seconds.
pub const BACKOFF_MAX_SECS: u64 = 300;

/// Cap on the backoff exponent.
pub const BACKOFF_EXP_CAP: u32 = 8;
