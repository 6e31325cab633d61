//! Endpoint notifications
//!
//! Every method runs on the event pump. None of them may block.

use std::net::SocketAddr;

use crate::ids::{HostId, InterfaceMask, ServiceId, ServiceTypeId};

/// A remote service found by discovery or connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteService {
    pub host_id: HostId,
    pub service_id: ServiceId,
    pub service_tag: u16,
    pub address: Option<SocketAddr>,
}

/// A remote service of the right type but with other interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incompatibility {
    pub remote_host: HostId,
    pub local_service: ServiceId,
    pub remote_service: ServiceId,
    pub service_type: ServiceTypeId,
    pub local_mask: InterfaceMask,
    /// Remote mask with its halves already swapped into local order
    pub remote_mask: InterfaceMask,
    pub address: Option<SocketAddr>,
}

/// Observer of one endpoint's peer lifecycle
pub trait ServiceObserver: Send + Sync {
    /// A compatible provider was announced. Return false to skip it.
    fn on_found_remote_service(&self, _service: &RemoteService) -> bool {
        true
    }

    fn on_incompatible(&self, _incompatibility: &Incompatibility) {}

    fn on_connected(&self, _service: &RemoteService) {}

    fn on_disconnected(&self, _host: HostId, _service: ServiceId) {}
}

/// Accepts every provider and ignores everything else
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultObserver;

impl ServiceObserver for DefaultObserver {}
