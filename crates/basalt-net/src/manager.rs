//! Connection manager: outbound connection handles and the accept loop.

use crate::{
    format_endpoint, parse_endpoint, ConnEvent, ConnId, Connection, NetError, NetResult,
    BACKOFF_BASE_SECS, BACKOFF_EXP_CAP, BACKOFF_MAX_SECS,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
#[cfg(test)]
use tokio::net::TcpListener;
use tokio::net::TcpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Base reconnect delay.
    pub backoff_base: Duration,
    /// Ceiling on the reconnect delay.
    pub backoff_max: Duration,
    /// Cap on the backoff exponent.
    pub backoff_exp_cap: u32,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(BACKOFF_BASE_SECS),
            backoff_max: Duration::from_secs(BACKOFF_MAX_SECS),
            backoff_exp_cap: BACKOFF_EXP_CAP,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the transport reports to its owner, on one ordered queue.
#[derive(Debug)]
pub enum NetEvent {
    /// A peer dialed us; its read pipeline starts right after this event is
    /// queued, so register it before draining further events.
    Incoming(Arc<Connection>),
    /// Something happened on a known connection.
    Conn(ConnId, ConnEvent),
    /// The accept loop hit an error; it keeps running.
    ListenerError(NetError),
}

/// Creates connections and accepts inbound ones.
pub struct ConnectionManager {
    config: NetConfig,
    events: mpsc::UnboundedSender<NetEvent>,
    next_id: Arc<AtomicU64>,
    accept_loops: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager and the event stream it reports on.
    pub fn new(config: NetConfig) -> (Self, mpsc::UnboundedReceiver<NetEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            events,
            next_id: Arc::new(AtomicU64::new(1)),
            accept_loops: Mutex::new(Vec::new()),
        };
        (manager, event_rx)
    }

    /// Create a connection handle for an endpoint. The connection stays idle
    /// until `open` is called on it.
    pub fn get(&self, endpoint: &str) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Connection::new(
            id,
            endpoint.to_string(),
            self.config.clone(),
            self.events.clone(),
        )
    }

    /// Bind the endpoint and start accepting peers. Returns the bound
    /// address, which carries the real port when the endpoint asked for 0.
    pub async fn listen(&self, endpoint: &str) -> NetResult<SocketAddr> {
        let (host, port) = parse_endpoint(endpoint)?;
        let addr = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|err| NetError::Resolution {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            })?
            .next()
            .ok_or_else(|| NetError::Resolution {
                endpoint: endpoint.to_string(),
                message: "no addresses resolved".to_string(),
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Listening");

        let events = self.events.clone();
        let config = self.config.clone();
        let next_id = self.next_id.clone();
        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let endpoint = format_endpoint(&peer);
                        info!(peer = %endpoint, "Incoming connection");
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        let conn =
                            Connection::new(id, endpoint, config.clone(), events.clone());
                        // writer first, then the announcement, then reading:
                        // the owner must see the connection before any frame
                        let gate = conn.attach(stream, false);
                        if events.send(NetEvent::Incoming(conn)).is_err() {
                            return;
                        }
                        gate.release();
                    }
                    Err(err) => {
                        error!(error = %err, "Accept failed");
                        if events
                            .send(NetEvent::ListenerError(NetError::Io(err)))
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
        });
        self.accept_loops.lock().push(accept_loop);

        Ok(local_addr)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for task in self.accept_loops.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, WritePayload};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<NetEvent>) -> NetEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_connect_accept_and_ordered_delivery() {
        let (server, mut server_rx) = ConnectionManager::new(NetConfig::default());
        let addr = server.listen("127.0.0.1:0").await.unwrap();

        let (client, mut client_rx) = ConnectionManager::new(NetConfig::default());
        let conn = client.get(&format_endpoint(&addr));
        conn.open();

        match next_event(&mut client_rx).await {
            NetEvent::Conn(id, ConnEvent::Connected) => assert_eq!(id, conn.id()),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(conn.is_open());

        let incoming = match next_event(&mut server_rx).await {
            NetEvent::Incoming(incoming) => incoming,
            other => panic!("unexpected event: {other:?}"),
        };

        // enqueue order must be wire order
        for _ in 0..3 {
            assert!(conn.enqueue_message(Message::Subscribe));
        }
        assert!(conn.enqueue_message(Message::Unsubscribe));

        let mut names = Vec::new();
        while names.len() < 4 {
            if let NetEvent::Conn(id, ConnEvent::Message(frame)) =
                next_event(&mut server_rx).await
            {
                assert_eq!(id, incoming.id());
                names.push(frame.message.name());
            }
        }
        assert_eq!(
            names,
            vec!["subscribe", "subscribe", "subscribe", "unsubscribe"]
        );
    }

    #[tokio::test]
    async fn test_write_callback_reports_success() {
        let (server, _server_rx) = ConnectionManager::new(NetConfig::default());
        let addr = server.listen("127.0.0.1:0").await.unwrap();

        let (client, mut client_rx) = ConnectionManager::new(NetConfig::default());
        let conn = client.get(&format_endpoint(&addr));
        conn.open();
        while !matches!(
            next_event(&mut client_rx).await,
            NetEvent::Conn(_, ConnEvent::Connected)
        ) {}

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        conn.enqueue(
            WritePayload::Typed(Message::Subscribe),
            Some(Box::new(move |result| {
                let _ = done_tx.send(result.is_ok());
            })),
        );
        assert!(timeout(WAIT, done_rx).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_invalid_endpoint_reported_without_retry() {
        let (client, mut client_rx) = ConnectionManager::new(NetConfig::default());
        let conn = client.get("::1:9876");
        conn.open();

        match next_event(&mut client_rx).await {
            NetEvent::Conn(_, ConnEvent::Error(NetError::InvalidEndpoint(_))) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        // no timer armed; a broken endpoint is not retried
        assert!(!conn.is_pending());
    }

    #[tokio::test]
    async fn test_refused_connect_schedules_retry() {
        let (client, mut client_rx) = ConnectionManager::new(NetConfig::default());
        // bind-then-drop to find a port with nothing listening
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = probe.local_addr().unwrap();
        drop(probe);

        let conn = client.get(&format_endpoint(&dead));
        conn.open();

        match next_event(&mut client_rx).await {
            NetEvent::Conn(_, ConnEvent::Error(NetError::Connect { .. })) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(conn.is_pending());
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_retry() {
        let (client, mut client_rx) = ConnectionManager::new(NetConfig::default());
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = probe.local_addr().unwrap();
        drop(probe);

        let conn = client.get(&format_endpoint(&dead));
        conn.open();
        match next_event(&mut client_rx).await {
            NetEvent::Conn(_, ConnEvent::Error(NetError::Connect { .. })) => {}
            other => panic!("unexpected event: {other:?}"),
        }

        conn.close();
        assert!(conn.is_closed());

        // past the 1 s first-retry mark nothing new may arrive
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(client_rx.try_recv().is_err());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal_and_retried() {
        use tokio::io::AsyncWriteExt;

        // raw listener stands in for a misbehaving peer
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(&((crate::MAX_MESSAGE_LENGTH as u32 + 1).to_le_bytes()))
                .await
                .unwrap();
            // keep the socket alive so the close is driven by the reader
            tokio::time::sleep(WAIT).await;
        });

        let (client, mut client_rx) = ConnectionManager::new(NetConfig::default());
        let conn = client.get(&format_endpoint(&addr));
        conn.open();

        let mut saw_error = false;
        let mut saw_disconnect = false;
        while !(saw_error && saw_disconnect) {
            match next_event(&mut client_rx).await {
                NetEvent::Conn(_, ConnEvent::Error(NetError::FrameTooLarge { size, .. })) => {
                    assert_eq!(size, crate::MAX_MESSAGE_LENGTH + 1);
                    saw_error = true;
                }
                NetEvent::Conn(_, ConnEvent::Disconnected) => saw_disconnect = true,
                _ => continue,
            }
        }
        // socket is gone and the reconnect timer is armed
        assert!(!conn.is_open());
        assert!(conn.is_pending());
    }
}
