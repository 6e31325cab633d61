//! Identities exchanged during discovery and handshake

use std::fmt;
use uuid::Uuid;

fn random_u64() -> u64 {
    let (high, low) = Uuid::new_v4().as_u64_pair();
    high ^ low
}

/// Random id generated once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u64);

impl HostId {
    pub fn random() -> Self {
        Self(random_u64())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Random id generated once per endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub u64);

impl ServiceId {
    pub fn random() -> Self {
        Self(random_u64())
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// The RPC contract a service implements. Peers must agree exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceTypeId(pub u32);

impl fmt::Display for ServiceTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Two interface ids packed into 64 bits.
///
/// The low half is the interface the endpoint calls on its peer, the high
/// half the interface the peer calls on it. A peer sees the same pair from
/// the other side, so masks are compared after [`swap_halves`](Self::swap_halves).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceMask(pub u64);

impl InterfaceMask {
    pub fn new(remote: u32, local: u32) -> Self {
        Self(u64::from(remote) | (u64::from(local) << 32))
    }

    /// Interface id called on the peer
    pub fn remote(self) -> u32 {
        self.0 as u32
    }

    /// Interface id served locally
    pub fn local(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The same mask as seen from the peer
    pub fn swap_halves(self) -> Self {
        Self(self.0.rotate_left(32))
    }

    /// True if a peer advertising `remote` talks to this endpoint
    pub fn matches(self, remote: InterfaceMask) -> bool {
        remote.swap_halves() == self
    }
}

impl fmt::Display for InterfaceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}:{:08X}", self.local(), self.remote())
    }
}
