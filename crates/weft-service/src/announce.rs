//! Discovery announcement datagram
//!
//! ```text
//! hostId:u64 count:u16
//! { serviceId:u64 serviceTypeId:u32 interfaceMask:u64 serviceTag:u16 listenPort:u16 } x count
//! ```
//! All integers little-endian.

use bytes::Bytes;
use weft_core::{MessageStream, Result, StreamReader};

use crate::ids::{HostId, InterfaceMask, ServiceId, ServiceTypeId};

/// Size of the datagram header
pub const HEADER_SIZE: usize = 10;

/// Size of one provider entry
pub const ENTRY_SIZE: usize = 24;

/// One advertised provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderEntry {
    pub service_id: ServiceId,
    pub service_type: ServiceTypeId,
    pub interface_mask: InterfaceMask,
    pub service_tag: u16,
    pub port: u16,
}

/// Every provider of one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub host_id: HostId,
    pub providers: Vec<ProviderEntry>,
}

impl Announcement {
    pub fn new(host_id: HostId) -> Self {
        Self {
            host_id,
            providers: Vec::new(),
        }
    }

    /// Encode the datagram. Providers beyond `u16::MAX` are left out.
    pub fn encode(&self) -> Bytes {
        let count = self.providers.len().min(usize::from(u16::MAX));
        let mut stream = MessageStream::with_capacity(HEADER_SIZE + count * ENTRY_SIZE);
        stream.write_u64(self.host_id.0);
        stream.write_u16(count as u16);
        for entry in &self.providers[..count] {
            stream.write_u64(entry.service_id.0);
            stream.write_u32(entry.service_type.0);
            stream.write_u64(entry.interface_mask.0);
            stream.write_u16(entry.service_tag);
            stream.write_u16(entry.port);
        }
        stream.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = StreamReader::new(data);
        let host_id = HostId(reader.read_u64()?);
        let count = reader.read_u16()?;
        reader.need(usize::from(count) * ENTRY_SIZE)?;

        let mut providers = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            providers.push(ProviderEntry {
                service_id: ServiceId(reader.read_u64()?),
                service_type: ServiceTypeId(reader.read_u32()?),
                interface_mask: InterfaceMask(reader.read_u64()?),
                service_tag: reader.read_u16()?,
                port: reader.read_u16()?,
            });
        }
        Ok(Self { host_id, providers })
    }
}
