//! Service host configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use weft_transport::TcpConfig;

use crate::error::{Result, ServiceError};

/// Default IPv4 group for announcements
pub const DEFAULT_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 7, 0);

/// Default IPv6 group for announcements (site-local scope)
pub const DEFAULT_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0x0700);

/// Configuration of one [`ServiceHost`](crate::ServiceHost)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Local addresses to announce on and to accept connections on. The
    /// first address is also the listen address of every provider.
    pub bind_addresses: Vec<IpAddr>,
    /// Multicast group for IPv4 bind addresses (none = unicast only)
    pub multicast_v4: Option<Ipv4Addr>,
    /// Multicast group for IPv6 bind addresses (none = unicast only)
    pub multicast_v6: Option<Ipv6Addr>,
    /// UDP port announcements are sent to and received on
    pub multicast_port: u16,
    /// Version advertised in every handshake
    pub protocol_version: u32,
    /// Lowest peer version accepted during the handshake
    pub required_version: u32,
    /// Largest inbound frame payload in bytes
    pub max_message_size: usize,
    /// TCP keep-alive in seconds (0 = disabled)
    pub keepalive_secs: u64,
    pub debug_multicasts: bool,
    pub debug_connections: bool,
    pub debug_messages: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addresses: vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)],
            multicast_v4: Some(DEFAULT_MULTICAST_V4),
            multicast_v6: Some(DEFAULT_MULTICAST_V6),
            multicast_port: weft_core::DEFAULT_MULTICAST_PORT,
            protocol_version: weft_core::PROTOCOL_VERSION,
            required_version: weft_core::PROTOCOL_VERSION,
            max_message_size: weft_transport::MAX_MESSAGE_SIZE,
            keepalive_secs: 30,
            debug_multicasts: false,
            debug_connections: false,
            debug_messages: false,
        }
    }
}

impl HostConfig {
    /// Configuration bound to loopback only, without multicast
    pub fn loopback() -> Self {
        Self {
            bind_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            multicast_v4: None,
            multicast_v6: None,
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ServiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_addresses.is_empty() {
            return Err(ServiceError::Config("no bind address".into()));
        }
        if self.required_version > self.protocol_version {
            return Err(ServiceError::Config(format!(
                "required version {} is newer than protocol version {}",
                self.required_version, self.protocol_version
            )));
        }
        if self.max_message_size == 0 {
            return Err(ServiceError::Config("max_message_size must be positive".into()));
        }
        Ok(())
    }

    /// Group to join for sockets bound to `address`
    pub fn group_for(&self, address: IpAddr) -> Option<IpAddr> {
        match address {
            IpAddr::V4(_) => self.multicast_v4.map(IpAddr::V4),
            IpAddr::V6(_) => self.multicast_v6.map(IpAddr::V6),
        }
    }

    /// Address providers listen on
    pub fn listen_address(&self) -> IpAddr {
        self.bind_addresses
            .first()
            .copied()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            max_message_size: self.max_message_size,
            keepalive_secs: self.keepalive_secs,
            ..TcpConfig::default()
        }
    }
}
