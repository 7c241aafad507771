//! Node coordinator.
//!
//! One task owns the shared state and every session, and serializes all
//! state-machine dispatch, cache mutation, and session-set edits. Transport
//! events, session signals (timers, write completions), chain notifications,
//! and operator commands all arrive on channels drained by the same loop.

use crate::NodeConfig;
use anyhow::{Context, Result};
use basalt_chain::{AcceptedHeader, BlockId, ChainInfo, ChainView, NodeId, NodeInfo};
use basalt_net::{
    ConnEvent, ConnId, Connection, ConnectionManager, InboundFrame, Message, NetConfig, NetEvent,
};
use basalt_session::{BaseState, BroadcastState, Session, SessionEvent, SharedState};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commands the coordinator accepts while running.
#[derive(Debug)]
pub enum NodeCommand {
    /// Dial a peer endpoint.
    Connect(String),
    /// Drop the session for an endpoint.
    Disconnect(String),
    /// Snapshot the node's sessions and caches.
    Status(oneshot::Sender<NodeStatus>),
    /// Stop the coordinator.
    Shutdown,
}

/// Status of one peer connection.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// Peer endpoint string.
    pub peer: String,
    /// Root state name.
    pub state: String,
    /// Still working toward an established session.
    pub connecting: bool,
    /// Feeding or awaiting catch-up blocks.
    pub syncing: bool,
    /// The peer's last-irreversible block number.
    pub last_irreversible_block_number: u32,
    /// The peer's head block id.
    pub head_block_id: BlockId,
}

/// Snapshot returned by `NodeCommand::Status`.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub sessions: Vec<SessionStatus>,
    pub blocks_cached: usize,
    pub transactions_cached: usize,
}

/// Handle to a running coordinator.
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl NodeHandle {
    /// The bound listen address, when listening is enabled.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn connect(&self, endpoint: &str) -> Result<()> {
        self.commands
            .send(NodeCommand::Connect(endpoint.to_string()))
            .await
            .context("node is gone")
    }

    pub async fn disconnect(&self, endpoint: &str) -> Result<()> {
        self.commands
            .send(NodeCommand::Disconnect(endpoint.to_string()))
            .await
            .context("node is gone")
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::Status(tx))
            .await
            .context("node is gone")?;
        rx.await.context("node dropped the status request")
    }

    /// Stop the coordinator and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.commands.send(NodeCommand::Shutdown).await;
        self.task.await.context("node task panicked")
    }
}

/// The coordinator itself; owned entirely by its run loop.
pub struct Node {
    config: NodeConfig,
    manager: ConnectionManager,
    net_events: Option<mpsc::UnboundedReceiver<NetEvent>>,
    signal_tx: mpsc::UnboundedSender<(ConnId, SessionEvent)>,
    signal_rx: Option<mpsc::UnboundedReceiver<(ConnId, SessionEvent)>>,
    headers: Option<mpsc::UnboundedReceiver<AcceptedHeader>>,
    commands: Option<mpsc::Receiver<NodeCommand>>,
    shared: SharedState,
    sessions: Vec<Session>,
}

impl Node {
    /// Bind, wire up the chain view, and start the coordinator task.
    pub async fn start(config: NodeConfig, chain: Arc<dyn ChainView>) -> Result<NodeHandle> {
        let node_id = match &config.node_id {
            Some(hex_id) => {
                let bytes = hex::decode(hex_id).context("node_id is not valid hex")?;
                NodeId::from_slice(&bytes).context("node_id must be 32 bytes")?
            }
            None => {
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill(&mut bytes[..]);
                NodeId::from(bytes)
            }
        };

        let local_chain = ChainInfo {
            last_irreversible_block_number: chain.last_irreversible_block_number(),
            head_block_id: chain.head_block_id(),
            chain_id: chain.chain_id(),
        };
        let local_info = NodeInfo {
            node_id,
            public_endpoint: config.public_endpoint(),
            agent_name: config.agent_name.clone(),
        };
        info!(
            node_id = %node_id,
            agent = %local_info.agent_name,
            head = %local_chain.head_block_id,
            lib = local_chain.last_irreversible_block_number,
            "Starting node"
        );

        let (manager, net_events) = ConnectionManager::new(NetConfig::default());
        let local_addr = if config.listen_endpoint.is_empty() {
            None
        } else {
            Some(manager.listen(&config.listen_endpoint).await?)
        };

        let headers = chain.subscribe();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(64);

        let mut node = Node {
            config,
            manager,
            net_events: Some(net_events),
            signal_tx,
            signal_rx: Some(signal_rx),
            headers: Some(headers),
            commands: Some(command_rx),
            shared: SharedState::new(local_chain, local_info),
            sessions: Vec::new(),
        };

        let task = tokio::spawn(async move {
            node.run().await;
        });

        Ok(NodeHandle {
            commands: command_tx,
            local_addr,
            task,
        })
    }

    async fn run(&mut self) {
        for endpoint in self.config.peers.clone() {
            self.connect(&endpoint);
        }

        let mut commands = self.commands.take().expect("run called twice");
        let mut net_events = self.net_events.take().expect("run called twice");
        let mut signals = self.signal_rx.take().expect("run called twice");
        let mut headers = self.headers.take().expect("run called twice");

        let mut cleanup = tokio::time::interval(Duration::from_secs(
            self.config.connection_cleanup_period.max(1),
        ));
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(NodeCommand::Connect(endpoint)) => self.connect(&endpoint),
                    Some(NodeCommand::Disconnect(endpoint)) => self.disconnect(&endpoint),
                    Some(NodeCommand::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    // an explicit shutdown or a dropped handle both stop us
                    Some(NodeCommand::Shutdown) | None => break,
                },
                Some(event) = net_events.recv() => self.handle_net_event(event),
                Some((conn_id, event)) = signals.recv() => {
                    self.post_to(conn_id, event);
                }
                Some(header) = headers.recv() => self.on_accepted_header(header),
                _ = cleanup.tick() => self.cleanup(),
            }
        }

        info!("Node shutting down");
        for mut session in self.sessions.drain(..) {
            session.shutdown(&mut self.shared);
        }
    }

    fn connect(&mut self, endpoint: &str) {
        info!(peer = %endpoint, "Dialing peer");
        let conn = self.manager.get(endpoint);
        self.create_session(conn.clone());
        conn.open();
    }

    fn disconnect(&mut self, endpoint: &str) {
        match self
            .sessions
            .iter()
            .position(|session| session.endpoint() == endpoint)
        {
            Some(index) => {
                let mut session = self.sessions.swap_remove(index);
                session.shutdown(&mut self.shared);
                info!(peer = %endpoint, "Disconnected peer");
            }
            None => warn!(peer = %endpoint, "No session for endpoint"),
        }
    }

    fn create_session(&mut self, conn: Arc<Connection>) -> usize {
        let index = self.shared.reserve_session_index();
        let session = Session::new(conn, index, self.signal_tx.clone(), &mut self.shared);
        self.sessions.push(session);
        self.sessions.len() - 1
    }

    fn find_session(&self, conn_id: ConnId) -> Option<usize> {
        self.sessions
            .iter()
            .position(|session| session.conn().id() == conn_id)
    }

    fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Incoming(conn) => {
                let index = self.create_session(conn);
                // the transport is already up; tell the session so
                self.sessions[index].post(SessionEvent::ConnectionEstablished, &mut self.shared);
            }
            NetEvent::Conn(conn_id, ConnEvent::Connected) => {
                self.post_to(conn_id, SessionEvent::ConnectionEstablished);
            }
            NetEvent::Conn(conn_id, ConnEvent::Disconnected) => {
                self.post_to(conn_id, SessionEvent::ConnectionLost);
            }
            NetEvent::Conn(conn_id, ConnEvent::Message(frame)) => {
                self.handle_message(conn_id, frame);
            }
            NetEvent::Conn(conn_id, ConnEvent::Error(err)) => {
                let endpoint = self
                    .find_session(conn_id)
                    .map(|index| self.sessions[index].endpoint().to_string());
                warn!(
                    peer = endpoint.as_deref().unwrap_or("<unknown>"),
                    error = %err,
                    "Connection error"
                );
            }
            NetEvent::ListenerError(err) => {
                error!(error = %err, "Listener error");
            }
        }
    }

    fn post_to(&mut self, conn_id: ConnId, event: SessionEvent) {
        if let Some(index) = self.find_session(conn_id) {
            self.sessions[index].post(event, &mut self.shared);
        }
    }

    /// Decode-branch-and-post: blocks and transactions feed the caches and
    /// fan out to every session; everything else goes straight to the
    /// originating session.
    fn handle_message(&mut self, conn_id: ConnId, frame: InboundFrame) {
        let Some(index) = self.find_session(conn_id) else {
            debug!(conn = conn_id, "Message for unknown connection");
            return;
        };

        match frame.message {
            Message::Block(block) => {
                let session_index = self.sessions[index].session_index();
                let entry = self.shared.block_cache.insert(block, Some(frame.raw));
                let id = entry.id;
                entry.mark_acked(session_index);

                self.sessions[index].post(SessionEvent::ReceivedBlock(id), &mut self.shared);
                self.broadcast(SessionEvent::BroadcastBlock(id));
            }
            Message::Transaction(transaction) => {
                let session_index = self.sessions[index].session_index();
                let entry = self
                    .shared
                    .transaction_cache
                    .insert(transaction, Some(frame.raw));
                let id = entry.id;
                entry.mark_acked(session_index);

                self.sessions[index].post(SessionEvent::ReceivedTransaction(id), &mut self.shared);
                self.broadcast(SessionEvent::BroadcastTransaction(id));
            }
            message => {
                self.sessions[index].post(SessionEvent::Message(message), &mut self.shared);
            }
        }
    }

    /// Post an event into every session, in insertion order.
    fn broadcast(&mut self, event: SessionEvent) {
        for session in &mut self.sessions {
            session.post(event.clone(), &mut self.shared);
        }
    }

    /// A new header was accepted by the chain: cache it, move the local
    /// view forward, and offer it to every session.
    fn on_accepted_header(&mut self, header: AcceptedHeader) {
        let id = header.block.id();
        self.shared.block_cache.insert(header.block, None);
        self.shared.local_chain.head_block_id = id;
        self.shared.local_chain.last_irreversible_block_number = header.last_irreversible;
        debug!(
            head = %id,
            lib = header.last_irreversible,
            "Local chain advanced"
        );

        self.broadcast(SessionEvent::BroadcastBlock(id));
    }

    fn cleanup(&mut self) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        let pruned = self.shared.transaction_cache.prune_expired(now_ms);
        if pruned > 0 {
            debug!(pruned, "Pruned expired transactions");
        }

        let mut index = 0;
        while index < self.sessions.len() {
            if self.sessions[index].conn().is_closed() {
                let mut session = self.sessions.swap_remove(index);
                debug!(peer = %session.endpoint(), "Dropping dead session");
                session.shutdown(&mut self.shared);
            } else {
                index += 1;
            }
        }
    }

    fn status(&self) -> NodeStatus {
        let sessions = self
            .sessions
            .iter()
            .map(|session| {
                let state = session.state();
                let syncing = matches!(
                    state,
                    BaseState::Connected(connected)
                        if matches!(connected.broadcast_state(), BroadcastState::Desynced(_))
                );
                SessionStatus {
                    peer: session.endpoint().to_string(),
                    state: state.name().to_string(),
                    connecting: !matches!(state, BaseState::Connected(_)),
                    syncing,
                    last_irreversible_block_number: session
                        .peer_chain()
                        .last_irreversible_block_number,
                    head_block_id: session.peer_chain().head_block_id,
                }
            })
            .collect();

        NodeStatus {
            node_id: self.shared.local_info.node_id,
            sessions,
            blocks_cached: self.shared.block_cache.len(),
            transactions_cached: self.shared.transaction_cache.len(),
        }
    }
}
