//! Broadcast sub-machine: the local-to-peer half of a session.
//!
//! Tracks whether this peer wants our broadcast feed. A fresh subscription
//! passes through a catch-up phase that compares the two chain views; only
//! once the views meet does real-time forwarding begin. Forwarding consults
//! the cache ack bitset so a peer never receives the same entry twice.

use crate::event::SessionEvent;
use crate::machine::{Machine, State};
use crate::session::Ctx;
use basalt_chain::BlockId;
use basalt_net::{Message, WritePayload};
use tracing::debug;

/// Broadcast states.
#[derive(Debug)]
pub enum BroadcastState {
    /// Connected but not subscribed.
    Idle,
    /// Subscribed but the chain views have not met yet.
    Desynced(Desynced),
    /// Subscribed and in sync; forwarding in real time.
    Subscribed,
}

/// Catch-up direction, chosen when the desynced state is entered.
#[derive(Debug)]
pub enum CatchUp {
    /// Views already matched, or no comparison has run.
    Unresolved,
    /// The peer trails us; feed it blocks until our head goes out.
    PeerBehind,
    /// We trail the peer; wait until its head has come in.
    LocalBehind,
}

/// Nested catch-up machine plus its bookkeeping.
#[derive(Debug)]
pub struct Desynced {
    sub: Machine<CatchUp>,
}

impl Desynced {
    fn new() -> Self {
        Self {
            sub: Machine::new(CatchUp::Unresolved),
        }
    }

    pub fn catch_up(&self) -> &CatchUp {
        self.sub.state()
    }

    fn enter(&mut self, ctx: &mut Ctx<'_>) {
        let local = ctx.shared.local_chain;
        let peer = ctx.peer.chain;
        let local_lib = local.last_irreversible_block_number;
        let peer_lib = peer.last_irreversible_block_number;

        if local_lib > peer_lib {
            self.sub.initialize_as(CatchUp::PeerBehind, ctx);
        } else if local_lib < peer_lib || peer.head_block_id != local.head_block_id {
            self.sub.initialize_as(CatchUp::LocalBehind, ctx);
        } else {
            self.sub.initialize(ctx);
            ctx.pending.push_back(SessionEvent::CaughtUp);
        }
    }

    fn exit(&mut self, ctx: &mut Ctx<'_>) {
        self.sub.shutdown(ctx);
    }
}

/// Pick the next block that moves the peer toward our head.
///
/// Walks the previous-link chain backward from the local head, collecting
/// cached entries this session has not acked, stopping at the peer's head, an
/// already-acked entry, or a cache miss. The oldest collected entry is the
/// one to send. Deterministic given the cache and the peer chain view, so a
/// repeat of the walk after a send lands on the successor.
fn next_block_for_peer(ctx: &Ctx<'_>) -> Option<BlockId> {
    let peer_head = ctx.peer.chain.head_block_id;
    let index = ctx.peer.session_index;
    let mut candidate = None;
    let mut cursor = ctx.shared.local_chain.head_block_id;

    while cursor != peer_head && !cursor.is_zero() {
        let Some(entry) = ctx.shared.block_cache.get(&cursor) else {
            break;
        };
        if entry.is_acked(index) {
            break;
        }
        candidate = Some(cursor);
        cursor = entry.previous;
    }
    candidate
}

/// Send one cached entry to the peer, acking it at enqueue time. Returns
/// false when the entry is unknown or already acked for this session.
fn send_cached_block(ctx: &mut Ctx<'_>, id: BlockId) -> bool {
    let index = ctx.peer.session_index;
    let Some(entry) = ctx.shared.block_cache.get_mut(&id) else {
        return false;
    };
    if entry.is_acked(index) {
        return false;
    }
    entry.mark_acked(index);
    let raw = entry.get_raw();

    let signals = ctx.peer.signals.clone();
    ctx.peer.conn.enqueue(
        WritePayload::Raw(raw),
        Some(Box::new(move |result| {
            if result.is_ok() {
                signals.notify(SessionEvent::SentBlock(id));
            }
        })),
    );
    debug!(peer = %ctx.peer.conn.endpoint(), block = %id, "Forwarding block");
    true
}

fn send_cached_transaction(ctx: &mut Ctx<'_>, id: basalt_chain::TransactionId) -> bool {
    let index = ctx.peer.session_index;
    let Some(entry) = ctx.shared.transaction_cache.get_mut(&id) else {
        return false;
    };
    if entry.is_acked(index) {
        return false;
    }
    entry.mark_acked(index);
    let raw = entry.get_raw();
    ctx.peer.conn.enqueue(WritePayload::Raw(raw), None);
    debug!(peer = %ctx.peer.conn.endpoint(), transaction = %id, "Forwarding transaction");
    true
}

/// Advance the peer one block, or complete when there is nothing left to
/// offer.
fn send_next_block(ctx: &mut Ctx<'_>) {
    let local_head = ctx.shared.local_chain.head_block_id;
    if local_head == ctx.peer.chain.head_block_id || local_head.is_zero() {
        ctx.pending.push_back(SessionEvent::CaughtUp);
        return;
    }
    match next_block_for_peer(ctx) {
        Some(id) => {
            send_cached_block(ctx, id);
        }
        None => {
            // everything we hold up to our head has gone out already
            let head_done = ctx
                .shared
                .block_cache
                .get(&local_head)
                .map(|entry| entry.is_acked(ctx.peer.session_index))
                .unwrap_or(false);
            if head_done {
                ctx.pending.push_back(SessionEvent::CaughtUp);
            }
        }
    }
}

impl<'a> State<Ctx<'a>> for BroadcastState {
    type Event = SessionEvent;

    fn enter(&mut self, ctx: &mut Ctx<'a>) {
        if let BroadcastState::Desynced(state) = self {
            state.enter(ctx);
        }
    }

    fn exit(&mut self, ctx: &mut Ctx<'a>) {
        if let BroadcastState::Desynced(state) = self {
            state.exit(ctx);
        }
    }

    fn on(&mut self, event: &SessionEvent, ctx: &mut Ctx<'a>) -> Option<Self> {
        match (&mut *self, event) {
            (BroadcastState::Idle, SessionEvent::Message(Message::Subscribe)) => {
                Some(BroadcastState::Desynced(Desynced::new()))
            }

            (BroadcastState::Desynced(_), SessionEvent::Message(Message::Unsubscribe)) => {
                Some(BroadcastState::Idle)
            }
            (BroadcastState::Desynced(_), SessionEvent::CaughtUp) => {
                Some(BroadcastState::Subscribed)
            }

            (BroadcastState::Subscribed, SessionEvent::Message(Message::Unsubscribe)) => {
                Some(BroadcastState::Idle)
            }
            (BroadcastState::Subscribed, SessionEvent::BroadcastBlock(id)) => {
                send_cached_block(ctx, *id);
                None
            }
            (BroadcastState::Subscribed, SessionEvent::BroadcastTransaction(id)) => {
                send_cached_transaction(ctx, *id);
                None
            }

            _ => None,
        }
    }

    fn descend(&mut self, event: &SessionEvent, ctx: &mut Ctx<'a>) {
        if let BroadcastState::Desynced(state) = self {
            state.sub.post(event, ctx);
        }
    }
}

impl<'a> State<Ctx<'a>> for CatchUp {
    type Event = SessionEvent;

    fn enter(&mut self, ctx: &mut Ctx<'a>) {
        if matches!(self, CatchUp::PeerBehind) {
            send_next_block(ctx);
        }
    }

    fn on(&mut self, event: &SessionEvent, ctx: &mut Ctx<'a>) -> Option<Self> {
        match (&*self, event) {
            // each completed send either finishes the catch-up or picks the
            // next block closer to our head
            (CatchUp::PeerBehind, SessionEvent::SentBlock(id)) => {
                if *id == ctx.shared.local_chain.head_block_id {
                    ctx.pending.push_back(SessionEvent::CaughtUp);
                } else {
                    send_next_block(ctx);
                }
                None
            }
            (CatchUp::LocalBehind, SessionEvent::ReceivedBlock(id)) => {
                if *id == ctx.peer.chain.head_block_id {
                    ctx.pending.push_back(SessionEvent::CaughtUp);
                }
                None
            }
            _ => None,
        }
    }
}
