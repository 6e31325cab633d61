//! Service endpoint
//!
//! One provider or client of a service type. Every peer link walks through
//! the same states:
//!
//! ```text
//! Connecting -> AwaitingHandshake -> Connected -> (removed)
//! ```
//!
//! Clients open links in [`ServiceEndpoint::add_provider`] and send their
//! handshake as soon as the link is up. Providers accept links on their
//! listener and answer a valid handshake with their own. A handshake that
//! fails validation closes the link. After the handshake every frame is
//! decoded with the endpoint's inbound codec and handed to its
//! [`MessageHandler`].
//!
//! All transport events arrive on the event pump, so handlers and
//! observers run one at a time.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};
use weft_core::{Codec, Message, Record};
use weft_transport::{
    ChannelId, ConnectionHandler, TcpConnection, TcpListenerSocket, TransportEvent,
    TransportSender,
};

use crate::announce::ProviderEntry;
use crate::connection::Connection;
use crate::error::{Result, ServiceError};
use crate::events::{DefaultObserver, Incompatibility, RemoteService, ServiceObserver};
use crate::handshake::{Handshake, Rejection};
use crate::host::ServiceHost;
use crate::ids::{HostId, InterfaceMask, ServiceId, ServiceTypeId};
use crate::service::{Interface, InterfaceKey};

/// Which side of a service an endpoint implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Listens for connections and is announced by the host
    Provider,
    /// Connects to announced providers
    Client,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Provider => "provider",
            Role::Client => "client",
        }
    }
}

/// State of one peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    AwaitingHandshake,
    Connected,
}

/// Receives decoded application messages
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, ctx: &MessageContext<'_>, message: Record) -> anyhow::Result<()>;
}

/// Drops every message
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreMessages;

impl MessageHandler for IgnoreMessages {
    fn on_message(&self, ctx: &MessageContext<'_>, message: Record) -> anyhow::Result<()> {
        trace!(
            "Ignoring message {:#x} from {}",
            message.uid(),
            ctx.sender()
        );
        Ok(())
    }
}

/// The peer a message came from, valid while its handler runs
pub struct MessageContext<'a> {
    endpoint: &'a ServiceEndpoint,
    caller: &'a Connection,
}

impl<'a> MessageContext<'a> {
    pub fn endpoint(&self) -> &'a ServiceEndpoint {
        self.endpoint
    }

    pub fn caller(&self) -> &'a Connection {
        self.caller
    }

    /// Service id of the sender
    pub fn sender(&self) -> ServiceId {
        self.caller.service_id()
    }

    /// Post `message` back to the sender
    pub fn reply(&self, message: &Record) -> Result<()> {
        let data = self.endpoint.outbound.encode_message(message)?;
        self.caller.post(data)?;
        Ok(())
    }

    pub fn reply_message<M: Message>(&self, message: &M) -> Result<()> {
        self.reply(&message.to_record())
    }
}

struct Pending {
    link: Arc<dyn TransportSender>,
    state: PeerState,
    service_tag: u16,
    /// Provider this client link was opened for
    expected: Option<ServiceId>,
}

#[derive(Default)]
struct Peers {
    pending: HashMap<ChannelId, Pending>,
    connections: HashMap<ChannelId, Connection>,
}

enum Removed {
    Pending(Pending),
    Connected(Connection),
}

/// Forwards link events to an endpoint without keeping it alive
struct EndpointEvents(Weak<ServiceEndpoint>);

impl ConnectionHandler for EndpointEvents {
    fn handle_event(
        &self,
        link: Arc<dyn TransportSender>,
        event: TransportEvent,
    ) -> anyhow::Result<()> {
        match self.0.upgrade() {
            Some(endpoint) => endpoint.handle_event(link, event),
            None => {
                if !matches!(event, TransportEvent::Disconnected { .. }) {
                    link.close();
                }
                Ok(())
            }
        }
    }
}

pub struct ServiceEndpoint {
    me: Weak<ServiceEndpoint>,
    host: ServiceHost,
    role: Role,
    service_id: ServiceId,
    service_type: ServiceTypeId,
    mask: InterfaceMask,
    service_tag: u16,
    inbound: Codec,
    outbound: Codec,
    observer: Arc<dyn ServiceObserver>,
    handler: Arc<dyn MessageHandler>,
    listener: Option<TcpListenerSocket>,
    started: AtomicBool,
    known: Mutex<HashSet<ServiceId>>,
    peers: Mutex<Peers>,
}

impl ServiceEndpoint {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_provider(&self) -> bool {
        self.role == Role::Provider
    }

    pub fn host(&self) -> &ServiceHost {
        &self.host
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn service_type(&self) -> ServiceTypeId {
        self.service_type
    }

    pub fn interface_mask(&self) -> InterfaceMask {
        self.mask
    }

    pub fn service_tag(&self) -> u16 {
        self.service_tag
    }

    /// Codec for messages received from peers
    pub fn inbound_codec(&self) -> &Codec {
        &self.inbound
    }

    /// Codec for messages sent to peers
    pub fn outbound_codec(&self) -> &Codec {
        &self.outbound
    }

    /// Port the provider accepts connections on
    pub fn listen_port(&self) -> Result<u16> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .ok_or(ServiceError::RoleMismatch(self.role.name()))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register with the host: providers get announced, clients start
    /// receiving announcements. Does nothing if already started.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.role {
            Role::Provider => self.host.register_provider(self.me.clone()),
            Role::Client => self.host.register_client(self.me.clone()),
        }
    }

    /// Deregister from the host. Existing connections stay open.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        match self.role {
            Role::Provider => self.host.deregister_provider(&self.me),
            Role::Client => self.host.deregister_client(&self.me),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Stop, stop listening and close every link
    pub fn close(&self) {
        self.stop();
        if let Some(listener) = &self.listener {
            listener.close();
        }
        let links: Vec<Arc<dyn TransportSender>> = {
            let peers = self.peers.lock();
            peers
                .pending
                .values()
                .map(|pending| pending.link.clone())
                .collect()
        };
        for link in links {
            link.close();
        }
        for connection in self.connections() {
            connection.close();
        }
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Connect to an announced provider.
    ///
    /// Returns true if a connection attempt was started. A provider id seen
    /// before is ignored until its connection ends. A provider whose
    /// interfaces do not match raises [`ServiceObserver::on_incompatible`]
    /// instead.
    pub fn add_provider(
        &self,
        remote_host: HostId,
        entry: &ProviderEntry,
        address: SocketAddr,
    ) -> Result<bool> {
        if self.role != Role::Client {
            return Err(ServiceError::RoleMismatch(self.role.name()));
        }

        if !self.known.lock().insert(entry.service_id) {
            return Ok(false);
        }

        if !self.mask.matches(entry.interface_mask) {
            debug!(
                "Provider {} on {} offers {}, expected {}",
                entry.service_id,
                address,
                entry.interface_mask.swap_halves(),
                self.mask
            );
            self.observer.on_incompatible(&Incompatibility {
                remote_host,
                local_service: self.service_id,
                remote_service: entry.service_id,
                service_type: self.service_type,
                local_mask: self.mask,
                remote_mask: entry.interface_mask.swap_halves(),
                address: Some(address),
            });
            return Ok(false);
        }

        let found = RemoteService {
            host_id: remote_host,
            service_id: entry.service_id,
            service_tag: entry.service_tag,
            address: Some(address),
        };
        if !self.observer.on_found_remote_service(&found) {
            debug!("Provider {} on {} declined", entry.service_id, address);
            return Ok(false);
        }

        let mut peers = self.peers.lock();
        if peers
            .connections
            .values()
            .any(|c| c.service_id() == entry.service_id)
        {
            error!("Already connected to provider {}", entry.service_id);
            return Ok(false);
        }

        let link = TcpConnection::connect(
            address,
            self.host.config().tcp_config(),
            self.events(),
            self.host.queue(),
        );
        if self.host.config().debug_connections {
            info!(
                "Connecting #{} to provider {} on {}",
                link.channel_id(),
                entry.service_id,
                address
            );
        }
        peers.pending.insert(
            link.channel_id(),
            Pending {
                link,
                state: PeerState::Connecting,
                service_tag: entry.service_tag,
                expected: Some(entry.service_id),
            },
        );
        Ok(true)
    }

    fn events(&self) -> Arc<dyn ConnectionHandler> {
        Arc::new(EndpointEvents(self.me.clone()))
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Encode once and post to every connected peer. Returns the number of
    /// peers the message was posted to.
    pub fn broadcast(&self, message: &Record) -> Result<usize> {
        let data = self.outbound.encode_message(message)?;
        Ok(self.post_where(&data, |_| true))
    }

    /// Post to the peer with service id `service`. An unknown id logs a
    /// warning and returns false.
    pub fn send_to(&self, service: ServiceId, message: &Record) -> Result<bool> {
        let Some(connection) = self.connection(service) else {
            warn!(
                "Attempt to send message to the remote service {}, which does not exist",
                service
            );
            return Ok(false);
        };
        let data = self.outbound.encode_message(message)?;
        connection.post(data)?;
        Ok(true)
    }

    /// Post to every connected peer except `service`
    pub fn send_to_except(&self, service: ServiceId, message: &Record) -> Result<usize> {
        let data = self.outbound.encode_message(message)?;
        Ok(self.post_where(&data, |c| c.service_id() != service))
    }

    fn post_where(&self, data: &Bytes, filter: impl Fn(&Connection) -> bool) -> usize {
        let peers = self.peers.lock();
        let mut posted = 0;
        for connection in peers.connections.values().filter(|c| filter(*c)) {
            match connection.post(data.clone()) {
                Ok(()) => posted += 1,
                Err(e) => debug!("Post to #{} failed: {}", connection.channel_id(), e),
            }
        }
        posted
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn connected_count(&self) -> usize {
        self.peers.lock().connections.len()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.peers.lock().connections.values().cloned().collect()
    }

    pub fn connection(&self, service: ServiceId) -> Option<Connection> {
        self.peers
            .lock()
            .connections
            .values()
            .find(|c| c.service_id() == service)
            .cloned()
    }

    pub fn peer_state(&self, channel: ChannelId) -> Option<PeerState> {
        let peers = self.peers.lock();
        if peers.connections.contains_key(&channel) {
            return Some(PeerState::Connected);
        }
        peers.pending.get(&channel).map(|pending| pending.state)
    }

    // ========================================================================
    // Link events
    // ========================================================================

    fn on_link_connected(&self, link: Arc<dyn TransportSender>) {
        let channel = link.channel_id();
        {
            let mut peers = self.peers.lock();
            match peers.pending.get_mut(&channel) {
                Some(pending) => pending.state = PeerState::AwaitingHandshake,
                None => {
                    peers.pending.insert(
                        channel,
                        Pending {
                            link: link.clone(),
                            state: PeerState::AwaitingHandshake,
                            service_tag: 0,
                            expected: None,
                        },
                    );
                }
            }
        }

        if self.host.config().debug_connections {
            info!("Established connection #{} to remote service", channel);
        }
        if self.role == Role::Client {
            self.send_handshake(link.as_ref());
        }
    }

    fn on_connect_failed(&self, link: Arc<dyn TransportSender>, reason: &str) {
        warn!("Connection #{} failed: {}", link.channel_id(), reason);
        let pending = self.peers.lock().pending.remove(&link.channel_id());
        if let Some(service) = pending.and_then(|p| p.expected) {
            self.known.lock().remove(&service);
        }
    }

    fn on_link_disconnected(&self, link: Arc<dyn TransportSender>, reason: Option<String>) {
        let channel = link.channel_id();
        let removed = {
            let mut peers = self.peers.lock();
            match peers.connections.remove(&channel) {
                Some(connection) => Some(Removed::Connected(connection)),
                None => peers.pending.remove(&channel).map(Removed::Pending),
            }
        };

        match removed {
            Some(Removed::Connected(connection)) => {
                if self.host.config().debug_connections {
                    info!(
                        "Lost connection #{} to remote service {} ({})",
                        channel,
                        connection.service_id(),
                        reason.as_deref().unwrap_or("closed")
                    );
                }
                if self.role == Role::Client {
                    self.known.lock().remove(&connection.service_id());
                }
                self.observer
                    .on_disconnected(connection.host_id(), connection.service_id());
            }
            Some(Removed::Pending(pending)) => {
                debug!("Connection #{} closed before handshake", channel);
                // A link closed after the transport came up was refused by
                // the provider; keep its id so it is not dialled again.
                if pending.state == PeerState::Connecting {
                    if let Some(service) = pending.expected {
                        self.known.lock().remove(&service);
                    }
                }
            }
            None => debug!("Disconnect on released connection #{}", channel),
        }
    }

    fn on_data(&self, link: Arc<dyn TransportSender>, data: Bytes) -> anyhow::Result<()> {
        let channel = link.channel_id();
        let connection = {
            let peers = self.peers.lock();
            match peers.connections.get(&channel) {
                Some(connection) => Some(connection.clone()),
                None if peers.pending.contains_key(&channel) => None,
                None => {
                    debug!("Dropping data on released connection #{}", channel);
                    return Ok(());
                }
            }
        };

        match connection {
            Some(connection) => self.dispatch(&connection, &data),
            None => {
                self.on_handshake(link, &data);
                Ok(())
            }
        }
    }

    fn on_handshake(&self, link: Arc<dyn TransportSender>, data: &[u8]) {
        let channel = link.channel_id();
        let handshake = match Handshake::decode(data) {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!("Malformed handshake on #{}: {}", channel, e);
                self.reject(link.as_ref());
                return;
            }
        };

        let config = self.host.config();
        if let Err(rejection) =
            handshake.validate(self.service_type, self.mask, config.required_version)
        {
            info!(
                "Rejected connection #{} from service {}: {}",
                channel, handshake.service_id, rejection
            );
            self.reject(link.as_ref());
            if !matches!(rejection, Rejection::Version { .. }) {
                self.observer.on_incompatible(&Incompatibility {
                    remote_host: handshake.host_id,
                    local_service: self.service_id,
                    remote_service: handshake.service_id,
                    service_type: self.service_type,
                    local_mask: self.mask,
                    remote_mask: handshake.interface_mask.swap_halves(),
                    address: link.remote_addr(),
                });
            }
            return;
        }

        let connection = {
            let mut peers = self.peers.lock();
            let Some(pending) = peers.pending.remove(&channel) else {
                return;
            };
            let connection = Connection::new(link.clone(), &handshake, pending.service_tag);
            peers.connections.insert(channel, connection.clone());
            connection
        };

        if self.role == Role::Provider {
            self.send_handshake(link.as_ref());
        }
        if config.debug_connections {
            info!(
                "Connection #{} accepted: service {} on host {}",
                channel,
                connection.service_id(),
                connection.host_id()
            );
        }
        self.observer.on_connected(&connection.remote_service());
    }

    fn dispatch(&self, connection: &Connection, data: &[u8]) -> anyhow::Result<()> {
        let message = self.inbound.decode_message(data)?;
        if self.host.config().debug_messages {
            debug!(
                "Message {:#x} from {} on #{}",
                message.uid(),
                connection.service_id(),
                connection.channel_id()
            );
        }
        let ctx = MessageContext {
            endpoint: self,
            caller: connection,
        };
        self.handler.on_message(&ctx, message)
    }

    fn send_handshake(&self, link: &dyn TransportSender) {
        let config = self.host.config();
        let handshake = Handshake {
            protocol_version: config.protocol_version,
            host_id: self.host.host_id(),
            service_id: self.service_id,
            service_type: self.service_type,
            interface_mask: self.mask,
        };
        if let Err(e) = link.post(handshake.encode()) {
            debug!("Handshake on #{} not sent: {}", link.channel_id(), e);
        }
    }

    fn reject(&self, link: &dyn TransportSender) {
        self.peers.lock().pending.remove(&link.channel_id());
        link.close();
    }
}

impl ConnectionHandler for ServiceEndpoint {
    fn handle_event(
        &self,
        link: Arc<dyn TransportSender>,
        event: TransportEvent,
    ) -> anyhow::Result<()> {
        match event {
            TransportEvent::Connected => self.on_link_connected(link),
            TransportEvent::ConnectFailed { reason } => self.on_connect_failed(link, &reason),
            TransportEvent::Data(data) => return self.on_data(link, data),
            TransportEvent::Disconnected { reason } => self.on_link_disconnected(link, reason),
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("role", &self.role)
            .field("service_id", &self.service_id)
            .field("service_type", &self.service_type)
            .field("mask", &self.mask)
            .field("started", &self.is_started())
            .field("connected", &self.connected_count())
            .finish()
    }
}

impl Drop for ServiceEndpoint {
    fn drop(&mut self) {
        if self.started.load(Ordering::Acquire) {
            self.stop();
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ServiceEndpoint`]
pub struct ServiceBuilder {
    host: ServiceHost,
    role: Role,
    service_type: ServiceTypeId,
    interfaces: Option<(InterfaceKey, InterfaceKey)>,
    service_tag: u16,
    port: u16,
    observer: Arc<dyn ServiceObserver>,
    handler: Arc<dyn MessageHandler>,
}

impl ServiceBuilder {
    pub fn new(host: &ServiceHost, role: Role, service_type: ServiceTypeId) -> Self {
        Self {
            host: host.clone(),
            role,
            service_type,
            interfaces: None,
            service_tag: 0,
            port: 0,
            observer: Arc::new(DefaultObserver),
            handler: Arc::new(IgnoreMessages),
        }
    }

    /// Call interface `R` on peers and serve interface `L`
    pub fn interfaces<R: Interface, L: Interface>(mut self) -> Self {
        self.interfaces = Some((InterfaceKey::of::<R>(), InterfaceKey::of::<L>()));
        self
    }

    /// Tag advertised with the provider
    pub fn tag(mut self, tag: u16) -> Self {
        self.service_tag = tag;
        self
    }

    /// Fixed listen port for providers (0 = any)
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn observer<O: ServiceObserver + 'static>(mut self, observer: Arc<O>) -> Self {
        self.observer = observer;
        self
    }

    pub fn handler<H: MessageHandler + 'static>(mut self, handler: Arc<H>) -> Self {
        self.handler = handler;
        self
    }

    /// Build the endpoint. Providers start listening here.
    pub async fn build(self) -> Result<Arc<ServiceEndpoint>> {
        let (remote, local) = self
            .interfaces
            .ok_or_else(|| ServiceError::Config("service interfaces not set".into()))?;
        let (remote_id, outbound) = self.host.resolve_interface(&remote)?;
        let (local_id, inbound) = self.host.resolve_interface(&local)?;
        let config = self.host.config();

        let listener = match self.role {
            Role::Provider => Some(TcpListenerSocket::new(
                config.tcp_config(),
                self.host.queue(),
            )),
            Role::Client => None,
        };
        let listen_addr = SocketAddr::new(config.listen_address(), self.port);

        let endpoint = Arc::new_cyclic(|me| ServiceEndpoint {
            me: me.clone(),
            host: self.host.clone(),
            role: self.role,
            service_id: ServiceId::random(),
            service_type: self.service_type,
            mask: InterfaceMask::new(remote_id, local_id),
            service_tag: self.service_tag,
            inbound,
            outbound,
            observer: self.observer,
            handler: self.handler,
            listener,
            started: AtomicBool::new(false),
            known: Mutex::new(HashSet::new()),
            peers: Mutex::new(Peers::default()),
        });

        if let Some(listener) = &endpoint.listener {
            let bound = listener.listen(listen_addr, endpoint.events()).await?;
            debug!(
                "Provider {} of type {} listening on {}",
                endpoint.service_id, endpoint.service_type, bound
            );
        }
        Ok(endpoint)
    }
}
