//! Weft Service
//!
//! Discovery and connection management on top of the Weft codec and
//! transports:
//! - [`ServiceHost`]: host identity, interface registry, multicast announcements
//! - [`ServiceEndpoint`]: one provider or client and its peer connections
//! - [`Service`]: an endpoint typed by the interfaces it calls and serves
//!
//! ```rust,ignore
//! let mut pump = EventPump::new();
//! let host = ServiceHost::new(HostConfig::default(), pump.queue());
//! host.register_interface::<Echo>(0x4543_484f)?;
//! host.register_interface::<EchoReply>(0x4543_5250)?;
//! host.start()?;
//!
//! let service = Service::<EchoReply, Echo>::provider(&host, ServiceTypeId(1)).await?;
//! service.start();
//!
//! loop {
//!     host.publish()?;
//!     pump.drain(Duration::from_millis(100), Duration::from_millis(500)).await?;
//! }
//! ```

pub mod announce;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod handshake;
pub mod host;
pub mod ids;
pub mod service;

pub use announce::{Announcement, ProviderEntry};
pub use config::HostConfig;
pub use connection::Connection;
pub use endpoint::{
    IgnoreMessages, MessageContext, MessageHandler, PeerState, Role, ServiceBuilder,
    ServiceEndpoint,
};
pub use error::{Result, ServiceError};
pub use events::{DefaultObserver, Incompatibility, RemoteService, ServiceObserver};
pub use handshake::{Handshake, Rejection};
pub use host::ServiceHost;
pub use ids::{HostId, InterfaceMask, ServiceId, ServiceTypeId};
pub use service::{Interface, InterfaceKey, Service};
