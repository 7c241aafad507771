//! Connection handling.
//!
//! A `Connection` owns one TCP socket at a time plus the machinery to get it
//! back: endpoint resolution, candidate iteration, and reconnect backoff. I/O
//! runs on two background tasks per socket, a reader draining frames and a
//! writer flushing a FIFO of queued messages in enqueue order. All tasks hold
//! weak references back to the connection so dropping it tears everything
//! down.
//!
//! At any moment an open-intent connection is in exactly one of three
//! conditions: socketed, waiting on a reconnect timer, or closed.

use crate::manager::{NetConfig, NetEvent};
use crate::{parse_endpoint, FrameCodec, InboundFrame, Message, NetError, READ_BUFFER_MIN};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Identifier a manager assigns to each connection it creates.
pub type ConnId = u64;

/// Events a connection reports to its owner.
#[derive(Debug)]
pub enum ConnEvent {
    /// An outbound connect completed.
    Connected,
    /// The socket went away, by error or by `close`.
    Disconnected,
    /// A complete frame arrived.
    Message(InboundFrame),
    /// Something failed; the connection handles its own recovery.
    Error(NetError),
}

/// An outbound write: a typed message serialized at write time, or bytes
/// already in wire form.
#[derive(Debug, Clone)]
pub enum WritePayload {
    Typed(Message),
    Raw(Bytes),
}

/// Invoked once the write it was enqueued with has been flushed or failed.
pub type WriteCallback = Box<dyn FnOnce(Result<(), NetError>) + Send + 'static>;

struct QueuedWrite {
    payload: WritePayload,
    then: Option<WriteCallback>,
}

/// Holds a freshly attached connection's reader parked until the owner has
/// had a chance to queue its announcement, so no message event can precede
/// it. Dropping the gate also releases the reader.
pub(crate) struct ReadGate(oneshot::Sender<()>);

impl ReadGate {
    pub(crate) fn release(self) {
        let _ = self.0.send(());
    }
}

/// Reconnect delay for the given attempt count.
pub fn backoff_delay(attempts: u32, config: &NetConfig) -> Duration {
    let shift = attempts.min(config.backoff_exp_cap);
    let delay = config
        .backoff_base
        .saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
    delay.min(config.backoff_max)
}

struct Inner {
    auto_reconnect: bool,
    closed: bool,
    connecting: bool,
    retry_attempts: u32,
    resolved: Option<SocketAddr>,
    /// Kept for aborts only; may lag behind `connecting`.
    connect_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    writer: Option<mpsc::UnboundedSender<QueuedWrite>>,
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
}

/// A resilient endpoint-addressed TCP connection.
pub struct Connection {
    id: ConnId,
    endpoint: String,
    config: NetConfig,
    events: mpsc::UnboundedSender<NetEvent>,
    inner: Mutex<Inner>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnId,
        endpoint: String,
        config: NetConfig,
        events: mpsc::UnboundedSender<NetEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            endpoint,
            config,
            events,
            inner: Mutex::new(Inner {
                auto_reconnect: false,
                closed: false,
                connecting: false,
                retry_attempts: 0,
                resolved: None,
                connect_task: None,
                reconnect_timer: None,
                writer: None,
                read_task: None,
                write_task: None,
            }),
        })
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// The configured or synthesized `host:port` for this connection.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The address of the last successful resolution, if any.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().resolved
    }

    /// Whether a socket is currently attached.
    pub fn is_open(&self) -> bool {
        self.inner.lock().writer.is_some()
    }

    /// Whether a reconnect timer or connect attempt is pending.
    pub fn is_pending(&self) -> bool {
        let inner = self.inner.lock();
        inner.reconnect_timer.is_some() || inner.connecting
    }

    /// No socket, no pending work, and no intent to reconnect.
    pub fn is_closed(&self) -> bool {
        let inner = self.inner.lock();
        !inner.auto_reconnect
            && inner.writer.is_none()
            && inner.reconnect_timer.is_none()
            && !inner.connecting
    }

    fn emit(&self, event: ConnEvent) {
        let _ = self.events.send(NetEvent::Conn(self.id, event));
    }

    /// Begin connecting, with automatic reconnects on failure.
    pub fn open(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            inner.auto_reconnect = true;
            inner.closed = false;
            if inner.writer.is_some() || inner.reconnect_timer.is_some() || inner.connecting {
                return;
            }
        }
        self.initiate();
    }

    /// Tear the connection down and stop reconnecting.
    pub fn close(&self) {
        let was_open;
        {
            let mut inner = self.inner.lock();
            inner.auto_reconnect = false;
            inner.closed = true;
            inner.connecting = false;
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(task) = inner.connect_task.take() {
                task.abort();
            }
            was_open = inner.writer.take().is_some();
            if let Some(task) = inner.read_task.take() {
                task.abort();
            }
            if let Some(task) = inner.write_task.take() {
                task.abort();
            }
        }
        if was_open {
            debug!(endpoint = %self.endpoint, "Connection closed");
            self.emit(ConnEvent::Disconnected);
        }
    }

    /// Queue an outbound write. Returns false when no socket is attached.
    pub fn enqueue(&self, payload: WritePayload, then: Option<WriteCallback>) -> bool {
        let inner = self.inner.lock();
        match &inner.writer {
            Some(writer) => writer.send(QueuedWrite { payload, then }).is_ok(),
            None => false,
        }
    }

    /// Queue a typed message with no completion callback.
    pub fn enqueue_message(&self, message: Message) -> bool {
        self.enqueue(WritePayload::Typed(message), None)
    }

    /// Resolve the endpoint and try each candidate address in turn.
    fn initiate(self: &Arc<Self>) {
        let (host, port) = match parse_endpoint(&self.endpoint) {
            Ok(parts) => parts,
            Err(err) => {
                // a malformed endpoint cannot be fixed by retrying
                self.emit(ConnEvent::Error(err));
                return;
            }
        };

        self.inner.lock().connecting = true;
        let weak = Arc::downgrade(self);
        let endpoint = self.endpoint.clone();
        let connect_timeout = self.config.connect_timeout;
        let task = tokio::spawn(async move {
            let addrs = match tokio::net::lookup_host((host.as_str(), port)).await {
                Ok(addrs) => addrs.collect::<Vec<_>>(),
                Err(err) => {
                    let Some(conn) = weak.upgrade() else { return };
                    conn.inner.lock().connecting = false;
                    conn.set_retry();
                    conn.emit(ConnEvent::Error(NetError::Resolution {
                        endpoint,
                        message: err.to_string(),
                    }));
                    return;
                }
            };

            let mut last_error = "no addresses resolved".to_string();
            for addr in addrs {
                let attempt = tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await;
                match attempt {
                    Ok(Ok(stream)) => {
                        let Some(conn) = weak.upgrade() else { return };
                        conn.finish_connect(addr, stream);
                        return;
                    }
                    Ok(Err(err)) => last_error = err.to_string(),
                    Err(_) => last_error = "connect timed out".to_string(),
                }
            }

            let Some(conn) = weak.upgrade() else { return };
            conn.inner.lock().connecting = false;
            conn.set_retry();
            conn.emit(ConnEvent::Error(NetError::Connect {
                endpoint,
                message: last_error,
            }));
        });
        self.inner.lock().connect_task = Some(task);
    }

    fn finish_connect(self: &Arc<Self>, addr: SocketAddr, stream: TcpStream) {
        {
            let mut inner = self.inner.lock();
            inner.connecting = false;
            if !inner.auto_reconnect {
                // closed while the connect was in flight
                return;
            }
            inner.retry_attempts = 0;
            inner.resolved = Some(addr);
        }
        debug!(endpoint = %self.endpoint, addr = %addr, "Connected");
        let gate = self.attach(stream, true);
        gate.release();
    }

    /// Wire a live socket up: the writer accepts traffic as soon as this
    /// returns, while the reader stays parked behind the returned gate so
    /// the owner can queue its announcement before any message event.
    pub(crate) fn attach(self: &Arc<Self>, stream: TcpStream, emit_connected: bool) -> ReadGate {
        let framed = Framed::with_capacity(stream, FrameCodec::new(), READ_BUFFER_MIN);
        let (mut sink, mut frames) = framed.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<QueuedWrite>();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let weak = Arc::downgrade(self);
        let read_task = tokio::spawn(async move {
            let _ = ready_rx.await;
            loop {
                match frames.next().await {
                    Some(Ok(frame)) => {
                        let Some(conn) = weak.upgrade() else { return };
                        conn.emit(ConnEvent::Message(frame));
                    }
                    Some(Err(err)) => {
                        let Some(conn) = weak.upgrade() else { return };
                        conn.emit(ConnEvent::Error(err));
                        conn.handle_error();
                        return;
                    }
                    None => {
                        let Some(conn) = weak.upgrade() else { return };
                        conn.handle_error();
                        return;
                    }
                }
            }
        });

        let write_task = tokio::spawn(async move {
            while let Some(write) = writer_rx.recv().await {
                match sink.send(write.payload).await {
                    Ok(()) => {
                        if let Some(then) = write.then {
                            then(Ok(()));
                        }
                    }
                    Err(err) => {
                        // the read side observes the dead socket and recovers;
                        // later queued callbacks fail fast on their own sends
                        warn!(error = %err, "Write failed");
                        if let Some(then) = write.then {
                            then(Err(err));
                        }
                    }
                }
            }
        });

        {
            let mut inner = self.inner.lock();
            if inner.closed {
                // closed while the socket was being wired up
                read_task.abort();
                write_task.abort();
                return ReadGate(ready_tx);
            }
            inner.writer = Some(writer_tx);
            inner.read_task = Some(read_task);
            inner.write_task = Some(write_task);
        }
        if emit_connected {
            self.emit(ConnEvent::Connected);
        }
        ReadGate(ready_tx)
    }

    /// Socket failure path: drop the socket, report, schedule a retry.
    fn handle_error(self: &Arc<Self>) {
        let was_open;
        {
            let mut inner = self.inner.lock();
            was_open = inner.writer.take().is_some();
            if let Some(task) = inner.read_task.take() {
                task.abort();
            }
            if let Some(task) = inner.write_task.take() {
                task.abort();
            }
        }
        self.set_retry();
        if was_open {
            self.emit(ConnEvent::Disconnected);
        }
    }

    /// Schedule the next connect attempt, exponentially delayed.
    fn set_retry(self: &Arc<Self>) {
        let delay;
        {
            let mut inner = self.inner.lock();
            if !inner.auto_reconnect || inner.reconnect_timer.is_some() {
                return;
            }
            delay = backoff_delay(inner.retry_attempts, &self.config);
            inner.retry_attempts += 1;
        }

        debug!(endpoint = %self.endpoint, delay_s = delay.as_secs(), "Scheduling reconnect");
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(conn) = weak.upgrade() else { return };
            let reconnect = {
                let mut inner = conn.inner.lock();
                inner.reconnect_timer = None;
                inner.auto_reconnect
            };
            if reconnect {
                conn.initiate();
            }
        });
        let mut inner = self.inner.lock();
        if inner.auto_reconnect {
            inner.reconnect_timer = Some(timer);
        } else {
            // closed between computing the delay and arming the timer
            timer.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for task in [
            inner.connect_task.take(),
            inner.reconnect_timer.take(),
            inner.read_task.take(),
            inner.write_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let config = NetConfig::default();
        let expected = [1u64, 2, 4, 8, 16, 32, 64, 128, 256, 256, 256];
        for (attempts, secs) in expected.iter().enumerate() {
            assert_eq!(
                backoff_delay(attempts as u32, &config),
                Duration::from_secs(*secs),
                "attempt {attempts}"
            );
        }
    }

    #[test]
    fn test_backoff_monotone_up_to_max() {
        let config = NetConfig::default();
        let mut last = Duration::ZERO;
        for attempts in 0..20 {
            let delay = backoff_delay(attempts, &config);
            assert!(delay >= last);
            assert!(delay <= config.backoff_max);
            last = delay;
        }
    }

    #[test]
    fn test_backoff_ceiling_binds_for_large_base() {
        let config = NetConfig {
            backoff_base: Duration::from_secs(2),
            ..NetConfig::default()
        };
        // 2 << 8 = 512 exceeds the 300 s ceiling
        assert_eq!(backoff_delay(8, &config), Duration::from_secs(300));
    }
}
