//! The per-peer session and its root state machine.
//!
//! A session owns one peer relationship: the connection handle, the peer's
//! chain and node descriptors, a reserved session index for ack bookkeeping,
//! and the root machine `disconnected → handshaking → connected`. The
//! connected state hosts the broadcast and receiver sub-machines and the
//! periodic status heartbeat.

use crate::broadcast::BroadcastState;
use crate::cache::SharedState;
use crate::event::SessionEvent;
use crate::machine::{Machine, State};
use crate::receiver::ReceiverState;
use crate::STATUS_INTERVAL;
use basalt_chain::{ChainInfo, NodeInfo};
use basalt_net::{ConnId, Connection, Hello, Message, Status, WritePayload};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Posts events back into a session from timers and write completions.
#[derive(Debug, Clone)]
pub struct SessionSignals {
    conn_id: ConnId,
    tx: mpsc::UnboundedSender<(ConnId, SessionEvent)>,
}

impl SessionSignals {
    pub fn new(conn_id: ConnId, tx: mpsc::UnboundedSender<(ConnId, SessionEvent)>) -> Self {
        Self { conn_id, tx }
    }

    /// Queue an event for this session; a no-op once the session is gone.
    pub fn notify(&self, event: SessionEvent) {
        let _ = self.tx.send((self.conn_id, event));
    }
}

/// Per-peer data the state machines operate on.
#[derive(Debug)]
pub struct Peer {
    /// The peer's view of the chain, from its status messages.
    pub chain: ChainInfo,
    /// The peer's identity, from its hello.
    pub info: NodeInfo,
    /// Bit position of this session in cache ack bitsets.
    pub session_index: u32,
    /// Transport to the peer.
    pub conn: Arc<Connection>,
    /// Route for deferred signals back into this session.
    pub signals: SessionSignals,
}

/// Context handed to every state-machine handler.
pub struct Ctx<'a> {
    pub shared: &'a mut SharedState,
    pub peer: &'a mut Peer,
    /// Events to dispatch after the current one completes.
    pub pending: &'a mut VecDeque<SessionEvent>,
}

impl Ctx<'_> {
    /// Send the local chain tip to the peer.
    pub fn send_status(&mut self) {
        let status = Status {
            last_irreversible_block_number: self.shared.local_chain.last_irreversible_block_number,
            head_block_id: self.shared.local_chain.head_block_id,
        };
        self.peer.conn.enqueue_message(Message::Status(status));
    }
}

/// Root session states.
#[derive(Debug)]
pub enum BaseState {
    /// No transport; waiting for the connection to come up.
    Disconnected,
    /// Exchanging hellos.
    Handshaking(Handshaking),
    /// Fully established.
    Connected(Connected),
}

impl BaseState {
    /// Short name for logs and status reporting.
    pub fn name(&self) -> &'static str {
        match self {
            BaseState::Disconnected => "disconnected",
            BaseState::Handshaking(_) => "handshaking",
            BaseState::Connected(_) => "connected",
        }
    }
}

/// Hello exchange bookkeeping.
#[derive(Debug, Default)]
pub struct Handshaking {
    hello_sent: bool,
    hello_received: bool,
}

impl Handshaking {
    fn send_hello(&self, ctx: &mut Ctx<'_>) {
        let hello = Hello {
            network_version: ctx.shared.network_version,
            chain_id: ctx.shared.local_chain.chain_id,
            node_id: ctx.shared.local_info.node_id,
            p2p_address: ctx.shared.local_info.public_endpoint.clone(),
            os: std::env::consts::OS.to_string(),
            agent: ctx.shared.local_info.agent_name.clone(),
        };
        let signals = ctx.peer.signals.clone();
        ctx.peer.conn.enqueue(
            WritePayload::Typed(Message::Hello(hello)),
            Some(Box::new(move |result| match result {
                Ok(()) => signals.notify(SessionEvent::HelloSent),
                Err(_) => signals.notify(SessionEvent::HelloFailed),
            })),
        );
    }

    fn on_hello(&mut self, hello: &Hello, ctx: &mut Ctx<'_>) -> Option<BaseState> {
        self.hello_received = true;
        ctx.peer.info.node_id = hello.node_id;
        ctx.peer.info.agent_name = hello.agent.clone();
        ctx.peer.info.public_endpoint = hello.p2p_address.clone();
        ctx.peer.chain.chain_id = hello.chain_id;
        debug!(
            peer = %ctx.peer.conn.endpoint(),
            agent = %hello.agent,
            "Received hello"
        );
        self.hello_sent
            .then(|| BaseState::Connected(Connected::new()))
    }

    fn on_hello_sent(&mut self) -> Option<BaseState> {
        self.hello_sent = true;
        self.hello_received
            .then(|| BaseState::Connected(Connected::new()))
    }
}

/// Established state hosting the two sub-machines and the heartbeat.
#[derive(Debug)]
pub struct Connected {
    broadcast: Machine<BroadcastState>,
    receiver: Machine<ReceiverState>,
    status_timer: Option<JoinHandle<()>>,
}

impl Connected {
    fn new() -> Self {
        Self {
            broadcast: Machine::new(BroadcastState::Idle),
            receiver: Machine::new(ReceiverState::Idle),
            status_timer: None,
        }
    }

    pub fn broadcast_state(&self) -> &BroadcastState {
        self.broadcast.state()
    }

    pub fn receiver_state(&self) -> &ReceiverState {
        self.receiver.state()
    }

    fn enter(&mut self, ctx: &mut Ctx<'_>) {
        info!(peer = %ctx.peer.conn.endpoint(), "Session connected");
        self.broadcast.initialize(ctx);
        self.receiver.initialize(ctx);

        ctx.send_status();
        let signals = ctx.peer.signals.clone();
        self.status_timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(STATUS_INTERVAL).await;
                signals.notify(SessionEvent::StatusTick);
            }
        }));
    }

    fn exit(&mut self, ctx: &mut Ctx<'_>) {
        if let Some(timer) = self.status_timer.take() {
            timer.abort();
        }
        self.broadcast.shutdown(ctx);
        self.receiver.shutdown(ctx);
    }
}

impl<'a> State<Ctx<'a>> for BaseState {
    type Event = SessionEvent;

    fn enter(&mut self, ctx: &mut Ctx<'a>) {
        match self {
            BaseState::Disconnected => {}
            BaseState::Handshaking(state) => state.send_hello(ctx),
            BaseState::Connected(state) => state.enter(ctx),
        }
    }

    fn exit(&mut self, ctx: &mut Ctx<'a>) {
        if let BaseState::Connected(state) = self {
            state.exit(ctx);
        }
    }

    fn on(&mut self, event: &SessionEvent, ctx: &mut Ctx<'a>) -> Option<Self> {
        match (&mut *self, event) {
            (BaseState::Disconnected, SessionEvent::ConnectionEstablished) => {
                Some(BaseState::Handshaking(Handshaking::default()))
            }

            (BaseState::Handshaking(state), SessionEvent::Message(Message::Hello(hello))) => {
                state.on_hello(hello, ctx)
            }
            (BaseState::Handshaking(state), SessionEvent::HelloSent) => state.on_hello_sent(),
            (BaseState::Handshaking(state), SessionEvent::HelloFailed) => {
                state.send_hello(ctx);
                None
            }
            (BaseState::Handshaking(_), SessionEvent::ConnectionLost) => {
                Some(BaseState::Disconnected)
            }

            // runs before any sub-machine sees the same status
            (BaseState::Connected(_), SessionEvent::Message(Message::Status(status))) => {
                ctx.peer.chain.head_block_id = status.head_block_id;
                ctx.peer.chain.last_irreversible_block_number =
                    status.last_irreversible_block_number;
                None
            }
            (BaseState::Connected(_), SessionEvent::StatusTick) => {
                ctx.send_status();
                None
            }
            (
                BaseState::Connected(_),
                SessionEvent::Message(Message::Goodbye { reason, .. }),
            ) => {
                info!(
                    peer = %ctx.peer.conn.endpoint(),
                    reason = %reason,
                    "Peer said goodbye"
                );
                ctx.peer.conn.close();
                None
            }
            (BaseState::Connected(_), SessionEvent::ConnectionLost) => {
                Some(BaseState::Disconnected)
            }

            _ => None,
        }
    }

    fn descend(&mut self, event: &SessionEvent, ctx: &mut Ctx<'a>) {
        if let BaseState::Connected(state) = self {
            state.broadcast.post(event, ctx);
            state.receiver.post(event, ctx);
        }
    }
}

/// One peer relationship, from connect/accept intent until removal.
pub struct Session {
    peer: Peer,
    pending: VecDeque<SessionEvent>,
    machine: Machine<BaseState>,
}

impl Session {
    /// Build a session over a connection. Reserves nothing itself; the
    /// caller supplies the index it reserved from the shared state.
    pub fn new(
        conn: Arc<Connection>,
        session_index: u32,
        signal_tx: mpsc::UnboundedSender<(ConnId, SessionEvent)>,
        shared: &mut SharedState,
    ) -> Self {
        let signals = SessionSignals::new(conn.id(), signal_tx);
        let mut session = Self {
            peer: Peer {
                chain: ChainInfo::default(),
                info: NodeInfo::default(),
                session_index,
                conn,
                signals,
            },
            pending: VecDeque::new(),
            machine: Machine::new(BaseState::Disconnected),
        };
        let mut ctx = Ctx {
            shared,
            peer: &mut session.peer,
            pending: &mut session.pending,
        };
        session.machine.initialize(&mut ctx);
        session
    }

    /// Dispatch an event through the state machines, then drain anything the
    /// handlers deferred.
    pub fn post(&mut self, event: SessionEvent, shared: &mut SharedState) {
        let mut ctx = Ctx {
            shared,
            peer: &mut self.peer,
            pending: &mut self.pending,
        };
        self.machine.post(&event, &mut ctx);
        while let Some(deferred) = ctx.pending.pop_front() {
            self.machine.post(&deferred, &mut ctx);
        }
    }

    /// Cascade exits through the machine hierarchy and drop the transport.
    pub fn shutdown(&mut self, shared: &mut SharedState) {
        let mut ctx = Ctx {
            shared,
            peer: &mut self.peer,
            pending: &mut self.pending,
        };
        self.machine.shutdown(&mut ctx);
        self.peer.conn.close();
    }

    pub fn state(&self) -> &BaseState {
        self.machine.state()
    }

    pub fn conn(&self) -> &Arc<Connection> {
        &self.peer.conn
    }

    pub fn endpoint(&self) -> &str {
        self.peer.conn.endpoint()
    }

    pub fn session_index(&self) -> u32 {
        self.peer.session_index
    }

    pub fn peer_chain(&self) -> &ChainInfo {
        &self.peer.chain
    }

    pub fn peer_info(&self) -> &NodeInfo {
        &self.peer.info
    }
}
