//! # basalt-session
//!
//! The per-peer session protocol and its supporting pieces.
//!
//! This crate provides:
//! - A small hierarchical state-machine runtime
//! - Content-addressed block and transaction caches with per-session
//!   acknowledgment bitsets
//! - The session state machines: handshake, broadcast (local to peer) and
//!   receiver (peer to local)

mod broadcast;
mod cache;
mod event;
mod machine;
mod receiver;
mod session;

pub use broadcast::{BroadcastState, CatchUp, Desynced};
pub use cache::{AckBits, BlockCache, BlockEntry, SharedState, TransactionCache, TransactionEntry};
pub use event::SessionEvent;
pub use machine::{Machine, State};
pub use receiver::{Delay, ReceiverState};
pub use session::{BaseState, Connected, Ctx, Handshaking, Peer, Session, SessionSignals};

use std::time::Duration;

/// How often a connected session emits a `Status` heartbeat.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// How long a refused subscription waits before going idle again.
pub const DELAY_INTERVAL: Duration = Duration::from_secs(5);
