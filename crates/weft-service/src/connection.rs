//! An established, handshaken link to a remote service

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use weft_transport::{ChannelId, TransportSender};

use crate::events::RemoteService;
use crate::handshake::Handshake;
use crate::ids::{HostId, InterfaceMask, ServiceId, ServiceTypeId};

#[derive(Clone)]
pub struct Connection {
    link: Arc<dyn TransportSender>,
    protocol_version: u32,
    host_id: HostId,
    service_id: ServiceId,
    service_type: ServiceTypeId,
    interface_mask: InterfaceMask,
    service_tag: u16,
}

impl Connection {
    pub(crate) fn new(link: Arc<dyn TransportSender>, handshake: &Handshake, service_tag: u16) -> Self {
        Self {
            link,
            protocol_version: handshake.protocol_version,
            host_id: handshake.host_id,
            service_id: handshake.service_id,
            service_type: handshake.service_type,
            interface_mask: handshake.interface_mask,
            service_tag,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.link.channel_id()
    }

    /// Version the peer advertised
    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn service_type(&self) -> ServiceTypeId {
        self.service_type
    }

    /// The peer's mask, unswapped
    pub fn interface_mask(&self) -> InterfaceMask {
        self.interface_mask
    }

    /// Tag from the announcement this connection was made for. Always 0 on
    /// the provider side.
    pub fn service_tag(&self) -> u16 {
        self.service_tag
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.link.remote_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub(crate) fn post(&self, data: Bytes) -> weft_transport::Result<()> {
        self.link.post(data)
    }

    pub fn close(&self) {
        self.link.close();
    }

    pub fn remote_service(&self) -> RemoteService {
        RemoteService {
            host_id: self.host_id,
            service_id: self.service_id,
            service_tag: self.service_tag,
            address: self.remote_addr(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("channel_id", &self.channel_id())
            .field("host_id", &self.host_id)
            .field("service_id", &self.service_id)
            .field("service_tag", &self.service_tag)
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}
