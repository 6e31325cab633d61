//! Transport trait definitions

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;

/// Process-unique id of one socket
pub type ChannelId = u32;

/// Events that can occur on a stream transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established (outgoing connect completed or incoming accepted)
    Connected,
    /// Outgoing connect attempt failed
    ConnectFailed { reason: String },
    /// One complete frame payload
    Data(Bytes),
    /// Connection closed (clean or error). Raised at most once per link.
    Disconnected { reason: Option<String> },
}

/// Outbound half of a stream link
pub trait TransportSender: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    /// Queue one payload for framing and sending. Never blocks; the queue is unbounded.
    fn post(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the link, discarding anything not yet written
    fn close(&self);

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Receives stream events on the pump thread
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle_event(
        &self,
        link: Arc<dyn TransportSender>,
        event: TransportEvent,
    ) -> anyhow::Result<()>;
}

/// Receives datagrams on the pump thread
pub trait DatagramHandler: Send + Sync + 'static {
    fn handle_datagram(&self, from: SocketAddr, data: Bytes) -> anyhow::Result<()>;
}
