//! Test harness for integration tests.
//!
//! Provides loopback node fixtures backed by in-memory chains, a scripted
//! raw peer speaking the framed protocol directly, and polling helpers.

use basalt_chain::{ChainId, MemoryChain, SignedBlock};
use basalt_net::{format_endpoint, FrameCodec, InboundFrame, Message, WritePayload};
use basalt_node::{Node, NodeConfig, NodeHandle, NodeStatus};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Ceiling on every wait in the harness.
pub const WAIT: Duration = Duration::from_secs(10);

/// A node under test with its backing chain.
pub struct TestNode {
    pub handle: NodeHandle,
    pub chain: Arc<MemoryChain>,
}

impl TestNode {
    /// Start a listening node on an ephemeral loopback port.
    pub async fn listening(agent: &str) -> Self {
        Self::start(agent, "127.0.0.1:0".to_string(), Vec::new()).await
    }

    /// Start a dialing-only node pointed at the given peers.
    pub async fn dialing(agent: &str, peers: Vec<String>) -> Self {
        Self::start(agent, String::new(), peers).await
    }

    async fn start(agent: &str, listen_endpoint: String, peers: Vec<String>) -> Self {
        let config = NodeConfig {
            listen_endpoint,
            peers,
            agent_name: agent.to_string(),
            connection_cleanup_period: 1,
            ..Default::default()
        };
        let chain = Arc::new(MemoryChain::new(ChainId::zero()));
        let handle = Node::start(config, chain.clone())
            .await
            .expect("node failed to start");
        Self { handle, chain }
    }

    /// The bound listen address.
    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr().expect("node is not listening")
    }

    /// The bound listen address as an endpoint string.
    pub fn endpoint(&self) -> String {
        format_endpoint(&self.addr())
    }

    /// Accept the next block on this node's chain.
    pub fn produce_block(&self, payload: &[u8]) -> SignedBlock {
        let block = self
            .chain
            .produce("test", Bytes::copy_from_slice(payload), 1);
        self.chain.accept(block.clone());
        block
    }

    pub async fn status(&self) -> NodeStatus {
        self.handle.status().await.expect("status query failed")
    }
}

/// Poll `probe` until it returns true or the harness deadline passes.
pub async fn wait_for<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if probe().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// A raw peer speaking the framed protocol from a plain socket.
pub struct ScriptedPeer {
    framed: Framed<TcpStream, FrameCodec>,
}

impl ScriptedPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = tokio::time::timeout(WAIT, TcpStream::connect(addr))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    pub async fn send(&mut self, message: Message) {
        self.framed
            .send(WritePayload::Typed(message))
            .await
            .expect("send failed");
    }

    pub async fn send_raw(&mut self, raw: Bytes) {
        self.framed
            .send(WritePayload::Raw(raw))
            .await
            .expect("send failed");
    }

    /// Next frame, if one arrives before the deadline.
    pub async fn try_recv(&mut self, deadline: Duration) -> Option<InboundFrame> {
        match tokio::time::timeout(deadline, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            Ok(Some(Err(err))) => panic!("frame error: {err}"),
            Ok(None) => None,
            Err(_) => None,
        }
    }

    /// Read frames until one with the given name shows up, skipping
    /// heartbeats and anything else along the way.
    pub async fn recv_named(&mut self, name: &str) -> InboundFrame {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for {name} frame"));
            match self.try_recv(remaining).await {
                Some(frame) if frame.message.name() == name => return frame,
                Some(_) => continue,
                None => panic!("stream ended waiting for {name} frame"),
            }
        }
    }

    /// Drain frames for a fixed window, returning the names seen.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<&'static str> {
        let deadline = tokio::time::Instant::now() + window;
        let mut names = Vec::new();
        loop {
            let Some(remaining) =
                deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                return names;
            };
            match self.try_recv(remaining).await {
                Some(frame) => names.push(frame.message.name()),
                None => return names,
            }
        }
    }
}
