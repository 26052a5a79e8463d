//! Connection lifecycle, framed receive and best-effort send
//!
//! A [`Connection`] owns the read half of one TCP socket and is driven by a
//! single task. The write half lives behind a lock shared with every
//! [`ConnectionHandle`], so the keepalive task, the command loop and an
//! operator can all send without contending with the reader.

use crate::keepalive::Keepalive;
use crate::{ConnectionConfig, Dialer, TransportError};
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tether_proto::codec::encode_output;
use tether_proto::{CommandBatch, Frame, FrameCodec, ProtocolError, PROTOCOL_ERROR_NOTICE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No usable socket
    Disconnected = 0,
    /// A connect sequence is in progress
    Connecting = 1,
    /// Socket established
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// Outcome of one framed receive
#[derive(Debug)]
pub enum Received {
    /// A command batch
    Batch(CommandBatch),
    /// A frame with an empty payload, silently ignored
    Empty,
    /// A keepalive frame
    Keepalive,
    /// The buffer was not a frame; a protocol notice was sent to the peer
    Malformed(ProtocolError),
    /// The connection was not connected
    NotConnected,
    /// The peer closed the socket, or it was closed locally
    Closed,
    /// Read error or read timeout
    Failed(TransportError),
}

impl Received {
    /// The command batch, if one was received
    pub fn into_batch(self) -> Option<CommandBatch> {
        match self {
            Self::Batch(batch) => Some(batch),
            _ => None,
        }
    }

    /// Whether this outcome counts as a failed receive
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::NotConnected | Self::Closed | Self::Failed(_)
        )
    }

    /// Whether the connection is gone after this outcome
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Closed | Self::Failed(_))
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between a connection and its handles
struct Shared {
    state: AtomicU8,
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Replaced on every successful connect; cancelled by close and drop
    shutdown: StdMutex<CancellationToken>,
    keepalive: StdMutex<Option<Keepalive>>,
    peer: StdMutex<Option<SocketAddr>>,
    codec: FrameCodec,
}

impl Shared {
    fn new(writer: Option<OwnedWriteHalf>, peer: Option<SocketAddr>, state: ConnectionState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            writer: Mutex::new(writer),
            shutdown: StdMutex::new(CancellationToken::new()),
            keepalive: StdMutex::new(None),
            peer: StdMutex::new(peer),
            codec: FrameCodec::new(),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.swap(state as u8, Ordering::SeqCst))
    }

    fn shutdown_token(&self) -> CancellationToken {
        lock(&self.shutdown).clone()
    }
}

/// Cloneable send/close side of a connection
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Check if the connection is established
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Remote address of the current socket
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.peer)
    }

    /// Write `data` in one locked write.
    ///
    /// Best-effort: failures are logged and reported as `false`, never
    /// propagated. A dead socket is detected by the next receive.
    pub async fn send_raw(&self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        let mut writer = self.shared.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return false;
        };

        let result = match stream.write_all(data).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("Send failed: {}", e);
                false
            }
        }
    }

    /// Send an output record, `Output:\n<text>\n`
    pub async fn send_output(&self, text: &str) -> bool {
        self.send_raw(&encode_output(text)).await
    }

    /// Send a command frame, `>>payload<<\n`.
    ///
    /// Fails only if the frame cannot be encoded; transmission itself stays
    /// best-effort.
    pub async fn send_command(&self, payload: &str) -> Result<bool, ProtocolError> {
        let encoded = self.shared.codec.encode(payload)?;
        Ok(self.send_raw(&encoded).await)
    }

    /// Send the keepalive frame
    pub async fn send_keepalive(&self) -> bool {
        match self.shared.codec.encode_frame(&Frame::keepalive()) {
            Ok(encoded) => self.send_raw(&encoded).await,
            Err(_) => false,
        }
    }

    /// Close the connection.
    ///
    /// Idempotent. Stops and joins the keepalive task, marks the connection
    /// disconnected, shuts the socket down and wakes a pending receive.
    pub async fn close(&self) {
        self.shared.shutdown_token().cancel();

        let keepalive = lock(&self.shared.keepalive).take();
        if let Some(keepalive) = keepalive {
            keepalive.stop().await;
        }

        let previous = self.shared.set_state(ConnectionState::Disconnected);

        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Socket shutdown failed: {}", e);
            }
        }

        if previous != ConnectionState::Disconnected {
            debug!("Connection to {:?} closed", self.peer_addr());
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .field("peer", &self.peer_addr())
            .finish()
    }
}

/// One TCP connection
pub struct Connection {
    /// Connection configuration
    config: ConnectionConfig,
    /// Dialer for outbound connections; `None` for accepted sockets
    dialer: Option<Arc<dyn Dialer>>,
    /// Read half, owned by the driving task
    reader: Option<OwnedReadHalf>,
    /// State shared with handles
    shared: Arc<Shared>,
}

impl Connection {
    /// Create a disconnected outbound connection
    pub fn new(config: ConnectionConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config,
            dialer: Some(dialer),
            reader: None,
            shared: Arc::new(Shared::new(None, None, ConnectionState::Disconnected)),
        }
    }

    /// Wrap an accepted socket; the connection starts out connected
    pub fn from_stream(stream: TcpStream, config: ConnectionConfig) -> Self {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let connection = Self {
            config,
            dialer: None,
            reader: Some(reader),
            shared: Arc::new(Shared::new(Some(writer), peer, ConnectionState::Connected)),
        };
        connection.start_keepalive();
        connection
    }

    /// A cloneable handle for sending and closing from other tasks
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Check if the connection is established
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Remote address of the current socket
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.peer)
    }

    /// Connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connect with exponential backoff.
    ///
    /// Makes up to `connect_retries` attempts, waiting after each failure
    /// and doubling the wait every time. Never fails loudly: after the last
    /// attempt the connection is left disconnected and `false` is returned.
    pub async fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        let Some(dialer) = self.dialer.clone() else {
            warn!("Cannot connect: connection has no dialer");
            return false;
        };

        let stale = lock(&self.shared.keepalive).take();
        if let Some(keepalive) = stale {
            keepalive.stop().await;
        }

        self.shared.set_state(ConnectionState::Connecting);
        let target = dialer.target();
        let retries = self.config.connect_retries;
        let mut delay = self.config.retry_base_delay();

        for attempt in 1..=retries {
            match dialer.dial().await {
                Ok(stream) => {
                    self.attach(stream).await;
                    info!("Connected to {} (attempt {}/{})", target, attempt, retries);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}; retrying in {:?}",
                        attempt, retries, target, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        warn!("Giving up on {} after {} attempts", target, retries);
        false
    }

    async fn attach(&mut self, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();

        *self.shared.writer.lock().await = Some(writer);
        *lock(&self.shared.peer) = peer;
        *lock(&self.shared.shutdown) = CancellationToken::new();
        self.reader = Some(reader);
        self.shared.set_state(ConnectionState::Connected);
        self.start_keepalive();
    }

    fn start_keepalive(&self) {
        let Some(interval) = self.config.keepalive_interval() else {
            return;
        };
        let token = self.shared.shutdown_token().child_token();
        let keepalive = Keepalive::spawn(self.handle(), interval, token);
        *lock(&self.shared.keepalive) = Some(keepalive);
        debug!("Keepalive started every {:?}", interval);
    }

    fn mark_disconnected(&self, reason: &dyn fmt::Display) {
        if self.shared.set_state(ConnectionState::Disconnected) == ConnectionState::Connected {
            debug!("Connection to {:?} lost: {}", self.peer_addr(), reason);
        }
    }

    /// Read once, up to the receive buffer size.
    ///
    /// EOF, read errors and read timeouts all leave the connection
    /// disconnected.
    pub async fn receive_raw(&mut self) -> Result<Bytes, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let token = self.shared.shutdown_token();
        let read_timeout = self.config.read_timeout();
        let mut buf = vec![0u8; self.config.receive_buffer_size.max(1)];
        let Some(reader) = self.reader.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let result = tokio::select! {
            _ = token.cancelled() => Err(TransportError::Closed),
            result = read_once(reader, &mut buf, read_timeout) => result,
        };

        match result {
            Ok(0) => {
                self.mark_disconnected(&"peer closed the connection");
                Err(TransportError::Closed)
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Err(e) => {
                self.mark_disconnected(&e);
                Err(e)
            }
        }
    }

    /// Receive and decode one frame
    pub async fn receive_frame(&mut self) -> Received {
        let chunk = match self.receive_raw().await {
            Ok(chunk) => chunk,
            Err(TransportError::NotConnected) => return Received::NotConnected,
            Err(TransportError::Closed) => return Received::Closed,
            Err(e) => return Received::Failed(e),
        };

        match self.shared.codec.decode(&chunk) {
            Ok(Some(frame)) if frame.is_keepalive() => Received::Keepalive,
            Ok(Some(frame)) => Received::Batch(CommandBatch::parse(frame.payload())),
            Ok(None) => Received::Empty,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                self.handle().send_output(PROTOCOL_ERROR_NOTICE).await;
                Received::Malformed(e)
            }
        }
    }

    /// Receive one command batch.
    ///
    /// `None` when not connected, on a malformed frame, on a read failure,
    /// and for frames that carry no command.
    pub async fn receive(&mut self) -> Option<CommandBatch> {
        self.receive_frame().await.into_batch()
    }

    /// Send an output record; see [`ConnectionHandle::send_output`]
    pub async fn send(&self, text: &str) -> bool {
        self.handle().send_output(text).await
    }

    /// Close the connection and release the socket. Idempotent.
    pub async fn close(&mut self) {
        self.handle().close().await;
        self.reader = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        lock(&self.shared.shutdown).cancel();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("peer", &self.peer_addr())
            .field("target", &self.dialer.as_ref().map(|d| d.target()))
            .finish()
    }
}

async fn read_once(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    read_timeout: Option<Duration>,
) -> Result<usize, TransportError> {
    match read_timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.read(buf)).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Timeout),
        },
        None => reader.read(buf).await.map_err(TransportError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TcpDialer;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Instant};

    /// Dialer that always fails without touching the network
    struct RefusingDialer {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Dialer for RefusingDialer {
        async fn dial(&self) -> Result<TcpStream, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Connection("refused".to_string()))
        }

        fn target(&self) -> String {
            "nowhere:0".to_string()
        }
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_retries: 1,
            retry_base_delay_ms: 10,
            connect_timeout_secs: 5,
            keepalive_interval_ms: None,
            read_timeout_secs: None,
            ..Default::default()
        }
    }

    /// Connect an outbound connection to a fresh listener, returning both ends
    async fn connected_pair(config: ConnectionConfig) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dialer = Arc::new(TcpDialer::new("127.0.0.1", port, Duration::from_secs(5)));
        let mut connection = Connection::new(config, dialer);

        let (connected, accepted) = tokio::join!(connection.connect(), listener.accept());
        assert!(connected);
        (connection, accepted.unwrap().0)
    }

    async fn read_until_eof(mut stream: TcpStream) -> String {
        let mut collected = Vec::new();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut collected))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(collected).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_backoff_timing() {
        let dialer = Arc::new(RefusingDialer {
            attempts: AtomicUsize::new(0),
        });
        let config = ConnectionConfig {
            connect_retries: 3,
            retry_base_delay_ms: 100,
            ..test_config()
        };
        let mut connection = Connection::new(config, dialer.clone());

        let started = Instant::now();
        assert!(!connection.connect().await);
        let elapsed = started.elapsed();

        // 100 + 200 + 400
        assert!(elapsed >= Duration::from_millis(700), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(750), "elapsed {:?}", elapsed);
        assert_eq!(dialer.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_receive_command_batch() {
        let (mut connection, mut server) = connected_pair(test_config()).await;
        assert!(connection.is_connected());

        server.write_all(b">>echo a;echo b<<\n").await.unwrap();
        let batch = connection.receive().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.commands()[1].tokens(), ["echo", "b"]);
    }

    #[tokio::test]
    async fn test_malformed_frame_sends_single_notice() {
        let (mut connection, mut server) = connected_pair(test_config()).await;

        server.write_all(b"use photographer<<").await.unwrap();
        assert!(connection.receive().await.is_none());
        assert!(connection.is_connected());
        connection.close().await;

        let received = read_until_eof(server).await;
        assert_eq!(received.matches(PROTOCOL_ERROR_NOTICE).count(), 1);
        assert!(received.starts_with("Output:\n"));
    }

    #[tokio::test]
    async fn test_empty_and_keepalive_frames_carry_no_command() {
        let (mut connection, mut server) = connected_pair(test_config()).await;

        server.write_all(b">><<").await.unwrap();
        assert!(matches!(connection.receive_frame().await, Received::Empty));

        server.write_all(b">>ping<<").await.unwrap();
        let received = connection.receive_frame().await;
        assert!(matches!(received, Received::Keepalive));
        assert!(!received.is_failure());
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let (mut connection, server) = connected_pair(test_config()).await;
        drop(server);

        let received = connection.receive_frame().await;
        assert!(received.is_disconnect());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(matches!(
            connection.receive_frame().await,
            Received::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_receive_and_is_idempotent() {
        let (mut connection, _server) = connected_pair(test_config()).await;
        let handle = connection.handle();

        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.close().await;
            handle.close().await;
        });

        let received = timeout(Duration::from_secs(5), connection.receive_frame())
            .await
            .unwrap();
        assert!(matches!(received, Received::Closed));
        closer.await.unwrap();

        connection.close().await;
        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(!connection.send("late").await);
    }

    #[tokio::test]
    async fn test_keepalive_pings_while_connected() {
        let config = ConnectionConfig {
            keepalive_interval_ms: Some(20),
            ..test_config()
        };
        let (mut connection, mut server) = connected_pair(config).await;

        let mut buf = vec![0u8; 64];
        let n = timeout(Duration::from_secs(5), server.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with(">>ping<<"));

        connection.close().await;
        assert!(lock(&connection.shared.keepalive).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let config = ConnectionConfig {
            keepalive_interval_ms: Some(1),
            ..test_config()
        };
        let (mut connection, server) = connected_pair(config).await;

        let mut workers = Vec::new();
        for worker in 0..8 {
            let handle = connection.handle();
            workers.push(tokio::spawn(async move {
                for n in 0..50 {
                    assert!(handle.send_output(&format!("worker-{}-{}", worker, n)).await);
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }
        connection.close().await;

        let received = read_until_eof(server).await.replace(">>ping<<\n", "");
        let records: Vec<&str> = received
            .split("Output:\n")
            .filter(|record| !record.is_empty())
            .collect();
        assert_eq!(records.len(), 400);
        assert!(records
            .iter()
            .all(|record| record.starts_with("worker-") && record.ends_with('\n')));
    }

    #[tokio::test]
    async fn test_accepted_stream_receive_raw() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut client = client.unwrap();
        let (stream, _) = accepted.unwrap();

        let mut connection = Connection::from_stream(stream, ConnectionConfig::accepted(None));
        assert!(connection.is_connected());
        assert!(connection.peer_addr().is_some());

        client.write_all(b"Output:\nhello\n").await.unwrap();
        let chunk = connection.receive_raw().await.unwrap();
        assert_eq!(&chunk[..], b"Output:\nhello\n");

        assert!(connection.handle().send_command("ls").await.unwrap());
        let mut buf = vec![0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b">>ls<<\n");

        // Without a dialer there is nothing to reconnect to
        connection.close().await;
        assert!(!connection.connect().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let _client = client.unwrap();
        let (stream, _) = accepted.unwrap();

        let config = ConnectionConfig::accepted(Some(Duration::from_secs(300)));
        let mut connection = Connection::from_stream(stream, config);

        let result = connection.receive_raw().await;
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_oversized_command_rejected() {
        let (connection, _server) = connected_pair(test_config()).await;
        let result = connection.handle().send_command(&"x".repeat(5000)).await;
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }
}
