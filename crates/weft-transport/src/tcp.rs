//! TCP transport implementation
//!
//! Each message is preceded by a 4-byte little-endian length prefix
//! (see [`weft_core::frame`]). Every connection runs one read task and one
//! write task; both stop when the connection's cancellation token fires.
//! Events are never delivered from those tasks directly but queued on the
//! [`EventQueue`].

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use weft_core::frame;

use crate::error::{Result, TransportError};
use crate::pump::{next_channel_id, EventQueue};
use crate::traits::{ChannelId, ConnectionHandler, TransportEvent, TransportSender};

/// Default upper bound for one inbound frame payload
pub const MAX_MESSAGE_SIZE: usize = frame::DEFAULT_MAX_FRAME_SIZE;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Maximum inbound payload size in bytes
    pub max_message_size: usize,
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            read_buffer_size: 8192,
            keepalive_secs: 30,
        }
    }
}

/// One TCP stream link
pub struct TcpConnection {
    me: Weak<TcpConnection>,
    channel_id: ChannelId,
    config: TcpConfig,
    handler: Arc<dyn ConnectionHandler>,
    queue: EventQueue,
    outbound: mpsc::UnboundedSender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    connected: AtomicBool,
    disconnect_queued: AtomicBool,
    cancel: CancellationToken,
    local: Mutex<Option<SocketAddr>>,
    remote: Mutex<Option<SocketAddr>>,
}

impl TcpConnection {
    fn new(
        config: TcpConfig,
        handler: Arc<dyn ConnectionHandler>,
        queue: EventQueue,
        remote: Option<SocketAddr>,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            channel_id: next_channel_id(),
            config,
            handler,
            queue,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            connected: AtomicBool::new(false),
            disconnect_queued: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            local: Mutex::new(None),
            remote: Mutex::new(remote),
        })
    }

    /// Start connecting to `remote` and return immediately.
    ///
    /// Success queues [`TransportEvent::Connected`], failure
    /// [`TransportEvent::ConnectFailed`]. Must be called within a tokio runtime.
    pub fn connect(
        remote: SocketAddr,
        config: TcpConfig,
        handler: Arc<dyn ConnectionHandler>,
        queue: EventQueue,
    ) -> Arc<Self> {
        let conn = Self::new(config, handler, queue, Some(remote));
        let task_conn = conn.clone();

        tokio::spawn(async move {
            debug!("Connecting #{} to {}", task_conn.channel_id, remote);
            let result = tokio::select! {
                _ = task_conn.cancel.cancelled() => return,
                result = TcpStream::connect(remote) => result,
            };
            match result {
                Ok(stream) => task_conn.start(stream),
                Err(e) => {
                    let err = TransportError::ConnectionFailed(format!("{}: {}", remote, e));
                    warn!("TCP connect #{} {}", task_conn.channel_id, err);
                    task_conn.cancel.cancel();
                    task_conn.disconnect_queued.store(true, Ordering::Release);
                    task_conn.dispatch(TransportEvent::ConnectFailed {
                        reason: err.to_string(),
                    });
                }
            }
        });

        conn
    }

    /// Wrap an accepted stream
    fn accepted(
        stream: TcpStream,
        config: TcpConfig,
        handler: Arc<dyn ConnectionHandler>,
        queue: EventQueue,
    ) -> Arc<Self> {
        let conn = Self::new(config, handler, queue, None);
        conn.start(stream);
        conn
    }

    fn start(self: &Arc<Self>, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP nodelay failed: {}", e);
        }
        if self.config.keepalive_secs > 0 {
            let socket = socket2::SockRef::from(&stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(self.config.keepalive_secs));
            if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
                debug!("TCP keepalive failed: {}", e);
            }
        }
        *self.local.lock() = stream.local_addr().ok();
        *self.remote.lock() = stream.peer_addr().ok();

        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }

        self.connected.store(true, Ordering::Release);
        self.dispatch(TransportEvent::Connected);

        let (reader, writer) = stream.into_split();
        tokio::spawn(self.clone().read_loop(reader));
        tokio::spawn(self.clone().write_loop(writer, outbound_rx));
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut read_buf = BytesMut::with_capacity(self.config.read_buffer_size);

        let reason = loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break None,
                result = reader.read_buf(&mut read_buf) => result,
            };
            match result {
                Ok(0) => {
                    debug!("TCP connection #{} closed by peer", self.channel_id);
                    break None;
                }
                Ok(_) => {
                    if let Err(reason) = self.split_frames(&mut read_buf) {
                        break Some(reason);
                    }
                }
                Err(e) => {
                    error!("TCP read error on #{}: {}", self.channel_id, e);
                    break Some(e.to_string());
                }
            }
        };

        self.shutdown(reason);
    }

    /// Queue every complete frame in `read_buf`
    fn split_frames(&self, read_buf: &mut BytesMut) -> std::result::Result<(), String> {
        while let Some(len) = frame::payload_len(read_buf) {
            if len > self.config.max_message_size {
                error!("Message too large: {} > {}", len, self.config.max_message_size);
                return Err(format!("Message too large: {}", len));
            }
            if frame::check_complete(read_buf).is_none() {
                read_buf.reserve(frame::HEADER_SIZE + len - read_buf.len());
                break;
            }
            read_buf.advance(frame::HEADER_SIZE);
            let data = read_buf.split_to(len).freeze();
            // empty frames carry nothing
            if !data.is_empty() {
                self.dispatch(TransportEvent::Data(data));
            }
        }
        Ok(())
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    ) {
        let reason = loop {
            let data = tokio::select! {
                _ = self.cancel.cancelled() => break None,
                data = outbound_rx.recv() => match data {
                    Some(data) => data,
                    None => break None,
                },
            };
            let framed = match frame::encode_frame(&data) {
                Ok(framed) => framed,
                Err(e) => break Some(e.to_string()),
            };
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break None,
                result = writer.write_all(&framed) => result,
            };
            if let Err(e) = result {
                error!("TCP write error on #{}: {}", self.channel_id, e);
                break Some(e.to_string());
            }
        };

        let _ = writer.shutdown().await;
        self.shutdown(reason);
    }

    /// Stop both tasks and queue the disconnect, once
    fn shutdown(&self, reason: Option<String>) {
        self.connected.store(false, Ordering::Release);
        self.cancel.cancel();
        if self.disconnect_queued.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dispatch(TransportEvent::Disconnected { reason });
    }

    fn dispatch(&self, event: TransportEvent) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        if !self.queue.dispatch(&self.handler, me, event) {
            debug!("Event pump gone, dropping event for #{}", self.channel_id);
        }
    }
}

impl TransportSender for TcpConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn post(&self, data: Bytes) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(data)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn close(&self) {
        debug!("Closing TCP connection #{}", self.channel_id);
        self.shutdown(None);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local.lock()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote.lock()
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("channel_id", &self.channel_id)
            .field("remote", &self.remote_addr())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// TCP listener; every accepted stream becomes a [`TcpConnection`]
pub struct TcpListenerSocket {
    channel_id: ChannelId,
    config: TcpConfig,
    queue: EventQueue,
    local: Mutex<Option<SocketAddr>>,
    cancel: CancellationToken,
}

impl TcpListenerSocket {
    pub fn new(config: TcpConfig, queue: EventQueue) -> Self {
        Self {
            channel_id: next_channel_id(),
            config,
            queue,
            local: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Bind and start accepting. Returns the bound address. A socket
    /// listens at most once.
    pub async fn listen(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<SocketAddr> {
        if self.local.lock().is_some() {
            return Err(TransportError::AlreadyListening);
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let local = listener.local_addr()?;
        {
            let mut slot = self.local.lock();
            if slot.is_some() {
                return Err(TransportError::AlreadyListening);
            }
            *slot = Some(local);
        }
        info!("TCP server listening on {}", local);

        let config = self.config.clone();
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        info!("TCP connection accepted from {}", peer);
                        let conn = TcpConnection::accepted(
                            stream,
                            config.clone(),
                            handler.clone(),
                            queue.clone(),
                        );
                        // close accepted links together with the listener
                        let child = cancel.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = child.cancelled() => conn.close(),
                                _ = conn.cancel.cancelled() => {}
                            }
                        });
                    }
                    Err(e) => {
                        warn!("{}", TransportError::AcceptFailed(e.to_string()));
                    }
                }
            }
            debug!("TCP listener on {} stopped", local);
        });

        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local.lock()
    }

    /// Stop accepting and close every accepted connection
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TcpListenerSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::EventPump;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ChannelId, String)>>,
        links: Mutex<Vec<Arc<dyn TransportSender>>>,
        failures: Mutex<Vec<String>>,
    }

    impl ConnectionHandler for Recorder {
        fn handle_event(
            &self,
            link: Arc<dyn TransportSender>,
            event: TransportEvent,
        ) -> anyhow::Result<()> {
            let name = match &event {
                TransportEvent::Connected => "connected".to_string(),
                TransportEvent::ConnectFailed { reason } => {
                    self.failures.lock().push(reason.clone());
                    "connect_failed".to_string()
                }
                TransportEvent::Data(data) => format!("data:{}", String::from_utf8_lossy(data)),
                TransportEvent::Disconnected { .. } => "disconnected".to_string(),
            };
            self.events.lock().push((link.channel_id(), name));
            if matches!(event, TransportEvent::Connected) {
                self.links.lock().push(link);
            }
            Ok(())
        }
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.events.lock().iter().map(|(_, n)| n.clone()).collect()
        }
    }

    async fn pump_until(pump: &mut EventPump, mut done: impl FnMut() -> bool) {
        for _ in 0..100 {
            pump.drain(Duration::from_millis(20), Duration::from_millis(20))
                .await
                .unwrap();
            if done() {
                return;
            }
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.keepalive_secs, 30);
    }

    #[tokio::test]
    async fn test_tcp_client_server_echo() {
        let mut pump = EventPump::new();
        let server_events = Arc::new(Recorder::default());
        let client_events = Arc::new(Recorder::default());

        let listener = TcpListenerSocket::new(TcpConfig::default(), pump.queue());
        let addr = listener
            .listen("127.0.0.1:0".parse().unwrap(), server_events.clone())
            .await
            .unwrap();
        assert!(matches!(
            listener
                .listen("127.0.0.1:0".parse().unwrap(), server_events.clone())
                .await,
            Err(TransportError::AlreadyListening)
        ));

        let client = TcpConnection::connect(
            addr,
            TcpConfig::default(),
            client_events.clone(),
            pump.queue(),
        );
        pump_until(&mut pump, || {
            client_events.names().contains(&"connected".to_string())
                && server_events.names().contains(&"connected".to_string())
        })
        .await;

        client.post(Bytes::from_static(b"one")).unwrap();
        client.post(Bytes::from_static(b"two")).unwrap();
        pump_until(&mut pump, || server_events.names().len() >= 3).await;
        assert_eq!(
            server_events.names(),
            vec!["connected", "data:one", "data:two"]
        );

        let accepted = server_events.links.lock()[0].clone();
        assert_eq!(accepted.remote_addr(), client.local_addr());
        accepted.post(Bytes::from_static(b"back")).unwrap();
        pump_until(&mut pump, || client_events.names().len() >= 2).await;
        assert_eq!(client_events.names(), vec!["connected", "data:back"]);

        client.close();
        assert!(!client.is_connected());
        assert!(client.post(Bytes::from_static(b"late")).is_err());
        pump_until(&mut pump, || {
            server_events.names().last().map(String::as_str) == Some("disconnected")
                && client_events.names().last().map(String::as_str) == Some("disconnected")
        })
        .await;

        // disconnect is reported exactly once per side
        pump.drain(Duration::from_millis(50), Duration::from_millis(50))
            .await
            .unwrap();
        let count = |r: &Recorder| r.names().iter().filter(|n| *n == "disconnected").count();
        assert_eq!(count(&client_events), 1);
        assert_eq!(count(&server_events), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_queued() {
        let mut pump = EventPump::new();
        let events = Arc::new(Recorder::default());

        // bind then drop to get a port nobody listens on
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let conn = TcpConnection::connect(addr, TcpConfig::default(), events.clone(), pump.queue());

        pump_until(&mut pump, || !events.names().is_empty()).await;
        assert_eq!(events.names(), vec!["connect_failed"]);
        let reason = events.failures.lock()[0].clone();
        assert!(
            reason.starts_with(&format!("connection failed: {}", addr)),
            "{}",
            reason
        );
        assert!(!conn.is_connected());

        // close after a failed connect raises nothing further
        conn.close();
        pump.drain(Duration::from_millis(30), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(events.names().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_disconnects() {
        let mut pump = EventPump::new();
        let server_events = Arc::new(Recorder::default());
        let client_events = Arc::new(Recorder::default());

        let small = TcpConfig {
            max_message_size: 4,
            ..TcpConfig::default()
        };
        let listener = TcpListenerSocket::new(small, pump.queue());
        let addr = listener
            .listen("127.0.0.1:0".parse().unwrap(), server_events.clone())
            .await
            .unwrap();

        let client =
            TcpConnection::connect(addr, TcpConfig::default(), client_events.clone(), pump.queue());
        pump_until(&mut pump, || !client_events.names().is_empty()).await;

        client.post(Bytes::from_static(b"too large")).unwrap();
        pump_until(&mut pump, || {
            server_events.names().last().map(String::as_str) == Some("disconnected")
        })
        .await;
        assert!(!server_events.names().iter().any(|n| n.starts_with("data:")));
    }
}
