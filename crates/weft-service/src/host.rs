//! Service host
//!
//! One per process. Owns the host id, the interface registry and one
//! multicast socket per bind address. Providers registered with the host are
//! announced by [`ServiceHost::publish`]; announcements received from other
//! hosts are routed to every registered client of the same service type.
//!
//! The host has no timer of its own. The application calls `publish()` on
//! whatever cadence it likes.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::TypeId;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use weft_core::{Codec, SchemaRegistry};
use weft_transport::{DatagramHandler, EventQueue, MulticastSocket};

use crate::announce::{Announcement, ProviderEntry};
use crate::config::HostConfig;
use crate::endpoint::{Role, ServiceBuilder, ServiceEndpoint};
use crate::error::{Result, ServiceError};
use crate::ids::{HostId, ServiceTypeId};
use crate::service::{Interface, InterfaceKey};

struct InterfaceEntry {
    id: u32,
    codec: Codec,
}

struct HostInner {
    host_id: HostId,
    config: HostConfig,
    queue: EventQueue,
    interfaces: DashMap<TypeId, InterfaceEntry>,
    providers: Mutex<Vec<Weak<ServiceEndpoint>>>,
    clients: Mutex<Vec<Weak<ServiceEndpoint>>>,
    sockets: Mutex<Vec<Arc<MulticastSocket>>>,
    running: AtomicBool,
}

/// Routes received announcements to the host without keeping it alive
struct Discovery(Weak<HostInner>);

impl DatagramHandler for Discovery {
    fn handle_datagram(&self, from: SocketAddr, data: Bytes) -> anyhow::Result<()> {
        if let Some(inner) = self.0.upgrade() {
            ServiceHost { inner }.handle_announcement(from, &data);
        }
        Ok(())
    }
}

/// Process-wide discovery context, cheap to clone
#[derive(Clone)]
pub struct ServiceHost {
    inner: Arc<HostInner>,
}

impl ServiceHost {
    /// Create a host with a random id. Events are queued on `queue`.
    pub fn new(config: HostConfig, queue: EventQueue) -> Self {
        Self::with_host_id(HostId::random(), config, queue)
    }

    pub fn with_host_id(host_id: HostId, config: HostConfig, queue: EventQueue) -> Self {
        Self {
            inner: Arc::new(HostInner {
                host_id,
                config,
                queue,
                interfaces: DashMap::new(),
                providers: Mutex::new(Vec::new()),
                clients: Mutex::new(Vec::new()),
                sockets: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn host_id(&self) -> HostId {
        self.inner.host_id
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> EventQueue {
        self.inner.queue.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open one announcement socket per bind address. Must be called
    /// within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let config = &self.inner.config;
        config.validate()?;
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(ServiceError::AlreadyRunning);
        }

        let mut sockets = Vec::with_capacity(config.bind_addresses.len());
        for address in &config.bind_addresses {
            let local = SocketAddr::new(*address, config.multicast_port);
            let handler = Arc::new(Discovery(Arc::downgrade(&self.inner)));
            match MulticastSocket::open(local, config.group_for(*address), handler, self.queue()) {
                Ok(socket) => sockets.push(socket),
                Err(e) => {
                    for socket in &sockets {
                        socket.close();
                    }
                    self.inner.running.store(false, Ordering::Release);
                    return Err(e.into());
                }
            }
        }
        *self.inner.sockets.lock() = sockets;

        info!("Started ServiceHost {}", self.inner.host_id);
        Ok(())
    }

    /// Close the announcement sockets. Does nothing if not running.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for socket in self.inner.sockets.lock().drain(..) {
            socket.close();
        }
        info!("Stopped ServiceHost {}", self.inner.host_id);
    }

    /// Local addresses of the announcement sockets
    pub fn multicast_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .sockets
            .lock()
            .iter()
            .map(|socket| socket.local_addr())
            .collect()
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Every started provider of this host
    pub fn announcement(&self) -> Announcement {
        let providers = live(&self.inner.providers);
        Announcement {
            host_id: self.inner.host_id,
            providers: providers
                .iter()
                .map(|provider| ProviderEntry {
                    service_id: provider.service_id(),
                    service_type: provider.service_type(),
                    interface_mask: provider.interface_mask(),
                    service_tag: provider.service_tag(),
                    port: provider.listen_port().unwrap_or(0),
                })
                .collect(),
        }
    }

    /// Send the announcement to the multicast group of every socket.
    /// Returns the number of datagrams queued.
    pub fn publish(&self) -> Result<usize> {
        if !self.is_running() {
            return Err(ServiceError::NotStarted);
        }
        let announcement = self.announcement();
        let datagram = announcement.encode();
        let port = self.inner.config.multicast_port;

        let mut sent = 0;
        for socket in self.inner.sockets.lock().iter() {
            let Some(group) = socket.group() else {
                continue;
            };
            socket.post_to(SocketAddr::new(group, port), datagram.clone())?;
            sent += 1;
        }
        if self.inner.config.debug_multicasts {
            debug!(
                "Published {} services in {} datagrams",
                announcement.providers.len(),
                sent
            );
        }
        Ok(sent)
    }

    /// Route one received announcement. Returns the number of connection
    /// attempts it started.
    pub fn handle_announcement(&self, from: SocketAddr, data: &[u8]) -> usize {
        let announcement = match Announcement::decode(data) {
            Ok(announcement) => announcement,
            Err(e) => {
                debug!("Ignoring malformed announcement from {}: {}", from, e);
                return 0;
            }
        };
        if announcement.host_id == self.inner.host_id || announcement.providers.is_empty() {
            return 0;
        }

        if self.inner.config.debug_multicasts {
            debug!(
                "Received multicast message from {} containing {} services",
                announcement.host_id,
                announcement.providers.len()
            );
        }

        let clients = live(&self.inner.clients);
        let mut started = 0;
        for entry in &announcement.providers {
            let address = SocketAddr::new(from.ip(), entry.port);
            for client in clients
                .iter()
                .filter(|client| client.service_type() == entry.service_type)
            {
                match client.add_provider(announcement.host_id, entry, address) {
                    Ok(true) => started += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Provider {} not added: {}", entry.service_id, e),
                }
            }
        }
        started
    }

    pub(crate) fn register_provider(&self, provider: Weak<ServiceEndpoint>) {
        register(&self.inner.providers, provider);
    }

    pub(crate) fn deregister_provider(&self, provider: &Weak<ServiceEndpoint>) {
        deregister(&self.inner.providers, provider);
    }

    pub(crate) fn register_client(&self, client: Weak<ServiceEndpoint>) {
        register(&self.inner.clients, client);
    }

    pub(crate) fn deregister_client(&self, client: &Weak<ServiceEndpoint>) {
        deregister(&self.inner.clients, client);
    }

    pub fn provider_count(&self) -> usize {
        live(&self.inner.providers).len()
    }

    pub fn client_count(&self) -> usize {
        live(&self.inner.clients).len()
    }

    // ========================================================================
    // Interfaces
    // ========================================================================

    /// Register interface `I` under `id`. Each interface type once.
    pub fn register_interface<I: Interface>(&self, id: u32) -> Result<()> {
        let mut registry = SchemaRegistry::new();
        I::register(&mut registry)?;
        let codec = Codec::new(registry)?;

        match self.inner.interfaces.entry(TypeId::of::<I>()) {
            Entry::Occupied(_) => Err(ServiceError::DuplicateInterface(I::NAME)),
            Entry::Vacant(slot) => {
                slot.insert(InterfaceEntry { id, codec });
                debug!("Registered interface {} as {:#x}", I::NAME, id);
                Ok(())
            }
        }
    }

    pub fn interface_id<I: Interface>(&self) -> Result<u32> {
        self.resolve_interface(&InterfaceKey::of::<I>())
            .map(|(id, _)| id)
    }

    /// Codec decoding the messages of interface `I`
    pub fn interface_codec<I: Interface>(&self) -> Result<Codec> {
        self.resolve_interface(&InterfaceKey::of::<I>())
            .map(|(_, codec)| codec)
    }

    pub(crate) fn resolve_interface(&self, key: &InterfaceKey) -> Result<(u32, Codec)> {
        self.inner
            .interfaces
            .get(&key.type_id)
            .map(|entry| (entry.id, entry.codec.clone()))
            .ok_or(ServiceError::UnregisteredInterface(key.name))
    }

    // ========================================================================
    // Builders
    // ========================================================================

    pub fn provider(&self, service_type: ServiceTypeId) -> ServiceBuilder {
        ServiceBuilder::new(self, Role::Provider, service_type)
    }

    pub fn client(&self, service_type: ServiceTypeId) -> ServiceBuilder {
        ServiceBuilder::new(self, Role::Client, service_type)
    }
}

impl std::fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("host_id", &self.inner.host_id)
            .field("running", &self.is_running())
            .field("interfaces", &self.inner.interfaces.len())
            .finish()
    }
}

/// Live members of a registration set. Dropped endpoints are pruned.
fn live(set: &Mutex<Vec<Weak<ServiceEndpoint>>>) -> Vec<Arc<ServiceEndpoint>> {
    let mut set = set.lock();
    set.retain(|endpoint| endpoint.strong_count() > 0);
    set.iter().filter_map(Weak::upgrade).collect()
}

fn register(set: &Mutex<Vec<Weak<ServiceEndpoint>>>, endpoint: Weak<ServiceEndpoint>) {
    let mut set = set.lock();
    if !set.iter().any(|existing| existing.ptr_eq(&endpoint)) {
        set.push(endpoint);
    }
}

fn deregister(set: &Mutex<Vec<Weak<ServiceEndpoint>>>, endpoint: &Weak<ServiceEndpoint>) {
    set.lock().retain(|existing| !existing.ptr_eq(endpoint));
}
