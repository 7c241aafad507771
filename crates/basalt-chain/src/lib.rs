//! # basalt-chain
//!
//! Chain-facing types for the basalt p2p layer.
//!
//! This crate provides:
//! - 32-byte content digests used as block/transaction/chain/node identifiers
//! - Signed block and packed transaction types with their binary codecs
//! - Per-peer chain and node descriptors
//! - The `ChainView` interface the networking core consumes, plus an
//!   in-memory implementation for the binary and tests

mod block;
mod digest;
mod error;
mod view;

pub use block::{PackedTransaction, SignedBlock};
pub use digest::{BlockId, ChainId, Digest32, NodeId, TransactionId};
pub use error::{ChainError, ChainResult};
pub use view::{AcceptedHeader, ChainView, MemoryChain};

/// Identity of a peer or local node, exchanged during the handshake.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    /// Node identifier (random per process unless pinned by config).
    pub node_id: NodeId,
    /// Externally reachable `host:port` this node advertises.
    pub public_endpoint: String,
    /// Agent string identifying the node software.
    pub agent_name: String,
}

/// Snapshot of a chain tip, kept for the local node and for every peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainInfo {
    /// Highest block number considered final.
    pub last_irreversible_block_number: u32,
    /// Tip of the currently preferred fork.
    pub head_block_id: BlockId,
    /// Identifier of the chain itself.
    pub chain_id: ChainId,
}
