//! Receiver sub-machine: the peer-to-local half of a session.
//!
//! Tracks whether we want the peer's broadcast feed. A peer at or ahead of
//! our irreversibility horizon is worth subscribing to; a refused
//! subscription backs off for a fixed delay before the next status can
//! trigger another attempt.

use crate::event::SessionEvent;
use crate::machine::State;
use crate::session::Ctx;
use crate::DELAY_INTERVAL;
use basalt_net::Message;
use tokio::task::JoinHandle;
use tracing::debug;

/// Receiver states.
#[derive(Debug)]
pub enum ReceiverState {
    /// Not interested yet; watching the peer's status.
    Idle,
    /// Asked for the peer's feed.
    Subscribed,
    /// Subscription refused; waiting before returning to idle.
    Delay(Delay),
}

/// Holds the running delay timer.
#[derive(Debug, Default)]
pub struct Delay {
    timer: Option<JoinHandle<()>>,
}

impl<'a> State<Ctx<'a>> for ReceiverState {
    type Event = SessionEvent;

    fn enter(&mut self, ctx: &mut Ctx<'a>) {
        match self {
            ReceiverState::Idle => {}
            ReceiverState::Subscribed => {
                debug!(peer = %ctx.peer.conn.endpoint(), "Subscribing to peer feed");
                ctx.peer.conn.enqueue_message(Message::Subscribe);
            }
            ReceiverState::Delay(delay) => {
                let signals = ctx.peer.signals.clone();
                delay.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(DELAY_INTERVAL).await;
                    signals.notify(SessionEvent::DelayExpired);
                }));
            }
        }
    }

    fn exit(&mut self, ctx: &mut Ctx<'a>) {
        match self {
            ReceiverState::Idle => {}
            ReceiverState::Subscribed => {
                ctx.peer.conn.enqueue_message(Message::Unsubscribe);
            }
            ReceiverState::Delay(delay) => {
                if let Some(timer) = delay.timer.take() {
                    timer.abort();
                }
            }
        }
    }

    fn on(&mut self, event: &SessionEvent, ctx: &mut Ctx<'a>) -> Option<Self> {
        match (&*self, event) {
            // the peer's chain info was already refreshed by the parent
            (ReceiverState::Idle, SessionEvent::Message(Message::Status(_))) => {
                let local_lib = ctx.shared.local_chain.last_irreversible_block_number;
                let peer_lib = ctx.peer.chain.last_irreversible_block_number;
                (local_lib <= peer_lib).then_some(ReceiverState::Subscribed)
            }
            (ReceiverState::Subscribed, SessionEvent::Message(Message::SubscriptionRefused)) => {
                Some(ReceiverState::Delay(Delay::default()))
            }
            (ReceiverState::Delay(_), SessionEvent::DelayExpired) => Some(ReceiverState::Idle),
            _ => None,
        }
    }
}
