//! Typed services
//!
//! An [`Interface`] names a set of messages one side of a service can
//! receive. A [`Service<R, L>`] calls interface `R` on its peers and serves
//! interface `L`; a matching peer is a `Service<L, R>` with the same
//! service type id.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;
use weft_core::{Message, SchemaRegistry};

use crate::endpoint::{Role, ServiceBuilder, ServiceEndpoint};
use crate::error::Result;
use crate::host::ServiceHost;
use crate::ids::{ServiceId, ServiceTypeId};

/// A set of message schemas received by one side of a service
pub trait Interface: Send + Sync + 'static {
    const NAME: &'static str;

    /// Register the schema of every message of this interface
    fn register(registry: &mut SchemaRegistry) -> weft_core::Result<()>;
}

/// Registry key of an interface type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceKey {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
}

impl InterfaceKey {
    pub fn of<I: Interface>() -> Self {
        Self {
            type_id: TypeId::of::<I>(),
            name: I::NAME,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Endpoint calling `R` on its peers and serving `L`
pub struct Service<R, L> {
    endpoint: Arc<ServiceEndpoint>,
    _interfaces: PhantomData<fn() -> (R, L)>,
}

impl<R: Interface, L: Interface> Service<R, L> {
    /// Builder preset with this service's interfaces
    pub fn builder(host: &ServiceHost, role: Role, service_type: ServiceTypeId) -> ServiceBuilder {
        ServiceBuilder::new(host, role, service_type).interfaces::<R, L>()
    }

    pub async fn provider(host: &ServiceHost, service_type: ServiceTypeId) -> Result<Self> {
        Self::create(Self::builder(host, Role::Provider, service_type)).await
    }

    pub async fn client(host: &ServiceHost, service_type: ServiceTypeId) -> Result<Self> {
        Self::create(Self::builder(host, Role::Client, service_type)).await
    }

    /// Build from a customised builder. The interfaces are always `R` and `L`.
    pub async fn create(builder: ServiceBuilder) -> Result<Self> {
        let endpoint = builder.interfaces::<R, L>().build().await?;
        Ok(Self {
            endpoint,
            _interfaces: PhantomData,
        })
    }

    pub fn endpoint(&self) -> &Arc<ServiceEndpoint> {
        &self.endpoint
    }

    pub fn service_id(&self) -> ServiceId {
        self.endpoint.service_id()
    }

    pub fn start(&self) {
        self.endpoint.start();
    }

    pub fn stop(&self) {
        self.endpoint.stop();
    }

    /// Post `message` to every connected peer. Returns the number of peers.
    pub fn broadcast<M: Message>(&self, message: &M) -> Result<usize> {
        self.endpoint.broadcast(&message.to_record())
    }

    /// Post `message` to one peer. Returns false if no such peer is connected.
    pub fn send_to<M: Message>(&self, service: ServiceId, message: &M) -> Result<bool> {
        self.endpoint.send_to(service, &message.to_record())
    }

    pub fn send_to_except<M: Message>(&self, service: ServiceId, message: &M) -> Result<usize> {
        self.endpoint.send_to_except(service, &message.to_record())
    }

    pub fn connected_count(&self) -> usize {
        self.endpoint.connected_count()
    }
}

impl<R, L> Clone for Service<R, L> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            _interfaces: PhantomData,
        }
    }
}

impl<R, L> std::fmt::Debug for Service<R, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
