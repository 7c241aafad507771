//! Shared message caches.
//!
//! Content-addressed stores for blocks and transactions, the source of what
//! sessions send. Each entry keeps the on-wire encoding (memoized on first
//! need) and a bitset of which sessions already know the entry. The caches
//! carry no synchronization of their own; the coordinator task serializes
//! every access.

use basalt_chain::{BlockId, ChainInfo, NodeInfo, PackedTransaction, SignedBlock, TransactionId};
use basalt_net::Message;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Growable bitset indexed by session index.
#[derive(Debug, Clone, Default)]
pub struct AckBits {
    words: Vec<u64>,
}

impl AckBits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: u32) -> bool {
        let word = (index / 64) as usize;
        match self.words.get(word) {
            Some(bits) => bits & (1u64 << (index % 64)) != 0,
            None => false,
        }
    }

    /// Set a bit, growing the set as needed.
    pub fn set(&mut self, index: u32) {
        let word = (index / 64) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (index % 64);
    }

    /// Number of representable bits.
    pub fn capacity(&self) -> u32 {
        (self.words.len() * 64) as u32
    }
}

/// A cached block.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub id: BlockId,
    pub previous: BlockId,
    pub block: Arc<SignedBlock>,
    raw: Option<Bytes>,
    session_acks: AckBits,
}

impl BlockEntry {
    /// The on-wire encoding of this block's message, encoded once and shared.
    pub fn get_raw(&mut self) -> Bytes {
        if self.raw.is_none() {
            self.raw = Some(Message::Block(self.block.clone()).encode());
        }
        self.raw.clone().unwrap()
    }

    pub fn has_raw(&self) -> bool {
        self.raw.is_some()
    }

    pub fn is_acked(&self, session_index: u32) -> bool {
        self.session_acks.get(session_index)
    }

    pub fn mark_acked(&mut self, session_index: u32) {
        self.session_acks.set(session_index);
    }
}

/// Content-addressed block store.
#[derive(Debug, Default)]
pub struct BlockCache {
    entries: HashMap<BlockId, BlockEntry>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block; a present id is a no-op returning the existing entry.
    pub fn insert(&mut self, block: Arc<SignedBlock>, raw: Option<Bytes>) -> &mut BlockEntry {
        let id = block.id();
        self.entries.entry(id).or_insert_with(|| BlockEntry {
            id,
            previous: block.previous,
            block,
            raw,
            session_acks: AckBits::new(),
        })
    }

    pub fn get(&self, id: &BlockId) -> Option<&BlockEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &BlockId) -> Option<&mut BlockEntry> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.entries.contains_key(id)
    }

    /// Record that a session has seen or been sent this block.
    pub fn mark_ack(&mut self, id: &BlockId, session_index: u32) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.mark_acked(session_index);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A cached transaction.
#[derive(Debug, Clone)]
pub struct TransactionEntry {
    pub id: TransactionId,
    pub expiration_ms: u64,
    pub transaction: Arc<PackedTransaction>,
    raw: Option<Bytes>,
    session_acks: AckBits,
}

impl TransactionEntry {
    pub fn get_raw(&mut self) -> Bytes {
        if self.raw.is_none() {
            self.raw = Some(Message::Transaction(self.transaction.clone()).encode());
        }
        self.raw.clone().unwrap()
    }

    pub fn is_acked(&self, session_index: u32) -> bool {
        self.session_acks.get(session_index)
    }

    pub fn mark_acked(&mut self, session_index: u32) {
        self.session_acks.set(session_index);
    }
}

/// Content-addressed transaction store with an expiration index.
#[derive(Debug, Default)]
pub struct TransactionCache {
    entries: HashMap<TransactionId, TransactionEntry>,
    by_expiration: BTreeSet<(u64, TransactionId)>,
}

impl TransactionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        transaction: Arc<PackedTransaction>,
        raw: Option<Bytes>,
    ) -> &mut TransactionEntry {
        let id = transaction.id();
        let by_expiration = &mut self.by_expiration;
        self.entries.entry(id).or_insert_with(|| {
            let expiration_ms = transaction.expiration_ms;
            by_expiration.insert((expiration_ms, id));
            TransactionEntry {
                id,
                expiration_ms,
                transaction,
                raw,
                session_acks: AckBits::new(),
            }
        })
    }

    pub fn get(&self, id: &TransactionId) -> Option<&TransactionEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &TransactionId) -> Option<&mut TransactionEntry> {
        self.entries.get_mut(id)
    }

    pub fn mark_ack(&mut self, id: &TransactionId, session_index: u32) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.mark_acked(session_index);
        }
    }

    /// Drop every transaction whose expiration is at or before `now_ms`.
    pub fn prune_expired(&mut self, now_ms: u64) -> usize {
        let expired: Vec<(u64, TransactionId)> = self
            .by_expiration
            .range(..=(now_ms, TransactionId::from([0xFFu8; 32])))
            .copied()
            .collect();
        for (expiration, id) in &expired {
            self.by_expiration.remove(&(*expiration, *id));
            self.entries.remove(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State shared between the coordinator and every session.
#[derive(Debug, Default)]
pub struct SharedState {
    pub local_chain: ChainInfo,
    pub local_info: NodeInfo,
    pub network_version: i16,
    pub block_cache: BlockCache,
    pub transaction_cache: TransactionCache,
    next_session_index: u32,
}

impl SharedState {
    pub fn new(local_chain: ChainInfo, local_info: NodeInfo) -> Self {
        Self {
            local_chain,
            local_info,
            ..Default::default()
        }
    }

    /// Hand out the next session index. Indices are never reused within a
    /// process lifetime.
    pub fn reserve_session_index(&mut self) -> u32 {
        let index = self.next_session_index;
        self.next_session_index += 1;
        index
    }
}
