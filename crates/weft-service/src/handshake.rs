//! Handshake message
//!
//! First message on every connection, in both directions. Sent as one
//! ordinary frame payload without a message type id:
//!
//! ```text
//! protocolVersion:u32 hostId:u64 serviceId:u64 serviceTypeId:u32 interfaceMask:u64
//! ```

use bytes::Bytes;
use weft_core::{MessageStream, Result, StreamReader};

use crate::ids::{HostId, InterfaceMask, ServiceId, ServiceTypeId};

pub const HANDSHAKE_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u32,
    pub host_id: HostId,
    pub service_id: ServiceId,
    pub service_type: ServiceTypeId,
    pub interface_mask: InterfaceMask,
}

/// Why a handshake was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ServiceType,
    InterfaceMask,
    Version { required: u32 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::ServiceType => write!(f, "service type ids do not match"),
            Rejection::InterfaceMask => write!(f, "interface ids do not match"),
            Rejection::Version { required } => {
                write!(f, "protocol version below required {}", required)
            }
        }
    }
}

impl Handshake {
    pub fn encode(&self) -> Bytes {
        let mut stream = MessageStream::with_capacity(HANDSHAKE_SIZE);
        stream.write_u32(self.protocol_version);
        stream.write_u64(self.host_id.0);
        stream.write_u64(self.service_id.0);
        stream.write_u32(self.service_type.0);
        stream.write_u64(self.interface_mask.0);
        stream.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = StreamReader::new(data);
        Ok(Self {
            protocol_version: reader.read_u32()?,
            host_id: HostId(reader.read_u64()?),
            service_id: ServiceId(reader.read_u64()?),
            service_type: ServiceTypeId(reader.read_u32()?),
            interface_mask: InterfaceMask(reader.read_u64()?),
        })
    }

    /// Check a received handshake against the local endpoint
    pub fn validate(
        &self,
        service_type: ServiceTypeId,
        mask: InterfaceMask,
        required_version: u32,
    ) -> std::result::Result<(), Rejection> {
        if self.service_type != service_type {
            return Err(Rejection::ServiceType);
        }
        if !mask.matches(self.interface_mask) {
            return Err(Rejection::InterfaceMask);
        }
        if self.protocol_version < required_version {
            return Err(Rejection::Version {
                required: required_version,
            });
        }
        Ok(())
    }
}
