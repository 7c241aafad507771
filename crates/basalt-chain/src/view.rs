//! The chain interface the networking core consumes.
//!
//! The p2p layer never validates or mutates chain state; it reads the tip,
//! the last-irreversible number, and subscribes to accepted-header
//! notifications. Everything else belongs to the chain itself.

use crate::{BlockId, ChainId, ChainInfo, SignedBlock};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Notification that the chain accepted a new block header.
#[derive(Debug, Clone)]
pub struct AcceptedHeader {
    /// The accepted block.
    pub block: Arc<SignedBlock>,
    /// Last-irreversible block number after applying this header.
    pub last_irreversible: u32,
}

/// Read-only view of the local chain.
pub trait ChainView: Send + Sync {
    /// Identifier of the chain.
    fn chain_id(&self) -> ChainId;

    /// Id of the current head block.
    fn head_block_id(&self) -> BlockId;

    /// Highest block number considered final.
    fn last_irreversible_block_number(&self) -> u32;

    /// Subscribe to accepted-header notifications.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<AcceptedHeader>;
}

/// In-memory chain used by the binary at genesis and by the test harness.
///
/// Holds a linear header list; `accept` appends a block, advances the head
/// and the irreversibility horizon, and notifies subscribers.
pub struct MemoryChain {
    chain_id: ChainId,
    inner: RwLock<MemoryChainInner>,
}

struct MemoryChainInner {
    head_block_id: BlockId,
    head_number: u32,
    last_irreversible: u32,
    /// How far behind the head irreversibility trails.
    irreversibility_lag: u32,
    subscribers: Vec<mpsc::UnboundedSender<AcceptedHeader>>,
}

impl MemoryChain {
    pub fn new(chain_id: ChainId) -> Self {
        Self::with_lag(chain_id, 0)
    }

    /// Chain whose irreversible number trails the head by `lag` blocks.
    pub fn with_lag(chain_id: ChainId, lag: u32) -> Self {
        Self {
            chain_id,
            inner: RwLock::new(MemoryChainInner {
                head_block_id: BlockId::zero(),
                head_number: 0,
                last_irreversible: 0,
                irreversibility_lag: lag,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Accept a locally produced or externally validated block.
    pub fn accept(&self, block: SignedBlock) -> AcceptedHeader {
        let block = Arc::new(block);
        let mut inner = self.inner.write();
        inner.head_block_id = block.id();
        inner.head_number = block.number;
        inner.last_irreversible = block.number.saturating_sub(inner.irreversibility_lag);

        let header = AcceptedHeader {
            block,
            last_irreversible: inner.last_irreversible,
        };
        debug!(
            id = %header.block.id(),
            number = header.block.number,
            "Accepted header"
        );
        inner
            .subscribers
            .retain(|tx| tx.send(header.clone()).is_ok());
        header
    }

    /// Build the next block on the current head.
    pub fn produce(&self, producer: &str, payload: bytes::Bytes, timestamp_ms: u64) -> SignedBlock {
        let inner = self.inner.read();
        SignedBlock {
            previous: inner.head_block_id,
            number: inner.head_number + 1,
            timestamp_ms,
            producer: producer.to_string(),
            payload,
        }
    }

    /// Snapshot of the chain tip as a `ChainInfo`.
    pub fn info(&self) -> ChainInfo {
        let inner = self.inner.read();
        ChainInfo {
            last_irreversible_block_number: inner.last_irreversible,
            head_block_id: inner.head_block_id,
            chain_id: self.chain_id,
        }
    }
}

impl ChainView for MemoryChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn head_block_id(&self) -> BlockId {
        self.inner.read().head_block_id
    }

    fn last_irreversible_block_number(&self) -> u32 {
        self.inner.read().last_irreversible
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AcceptedHeader> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().subscribers.push(tx);
        rx
    }
}
