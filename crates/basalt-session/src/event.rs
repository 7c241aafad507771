//! Session events.

use basalt_chain::{BlockId, TransactionId};
use basalt_net::Message;

/// Everything a session's state machines can observe: transport signals,
/// decoded peer messages, timer ticks, write completions, and coordinator
/// broadcasts. Blocks and transactions arriving from the wire are intercepted
/// by the coordinator and show up as the `Received*` variants.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The transport came up for this peer.
    ConnectionEstablished,
    /// The transport went away.
    ConnectionLost,
    /// Our hello was flushed to the peer.
    HelloSent,
    /// Our hello failed to send.
    HelloFailed,
    /// Periodic status heartbeat tick.
    StatusTick,
    /// The receiver-side retry delay elapsed.
    DelayExpired,
    /// The broadcast catch-up resolved; real-time forwarding may begin.
    CaughtUp,
    /// A block we enqueued for this peer finished sending.
    SentBlock(BlockId),
    /// A block from this peer entered the cache.
    ReceivedBlock(BlockId),
    /// A transaction from this peer entered the cache.
    ReceivedTransaction(TransactionId),
    /// The coordinator offers a cached block to this session.
    BroadcastBlock(BlockId),
    /// The coordinator offers a cached transaction to this session.
    BroadcastTransaction(TransactionId),
    /// Any other decoded message from the peer.
    Message(Message),
}
