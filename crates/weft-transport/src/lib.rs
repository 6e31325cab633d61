//! Weft Transport Layer
//!
//! Socket plumbing for Weft services:
//! - TCP stream links with length-prefixed framing
//! - UDP multicast for discovery announcements
//! - An event pump that serializes every callback onto one caller-driven loop
//!
//! Sockets run on the tokio runtime but never call application code from
//! their tasks. Events are queued and delivered when the application calls
//! [`EventPump::drain`].

pub mod error;
pub mod pump;
pub mod tcp;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use pump::{next_channel_id, EventPump, EventQueue, Job};
pub use tcp::{TcpConfig, TcpConnection, TcpListenerSocket, MAX_MESSAGE_SIZE};
pub use traits::{ChannelId, ConnectionHandler, DatagramHandler, TransportEvent, TransportSender};
pub use udp::{MulticastSocket, MAX_DATAGRAM_SIZE};
