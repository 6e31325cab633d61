//! Shared fixtures: a ping/pong service and recording callbacks

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weft_core::{Message, MessageSchema, Record, SchemaRegistry, WireType};
use weft_service::{
    HostConfig, HostId, Incompatibility, Interface, MessageContext, MessageHandler,
    RemoteService, ServiceHost, ServiceId, ServiceObserver, ServiceTypeId,
};
use weft_transport::{EventPump, TransportSender};
use weft_test_utils::RecordingLink;

pub const PING_SERVICE: ServiceTypeId = ServiceTypeId(0x5049_4e47);
pub const PING_API: u32 = 0x10;
pub const PONG_API: u32 = 0x20;

#[derive(Debug, Clone, PartialEq)]
pub struct Ping {
    pub seq: u32,
    pub text: String,
}

impl Message for Ping {
    const UID: u32 = 0x0000_0001;

    fn schema() -> MessageSchema {
        MessageSchema::builder(Self::UID, "Ping")
            .field("seq", WireType::U32)
            .field("text", WireType::String)
            .build()
    }

    fn to_record(&self) -> Record {
        Record::new(Self::UID, vec![self.seq.into(), self.text.clone().into()])
    }

    fn from_record(mut record: Record) -> weft_core::Result<Self> {
        Ok(Self {
            seq: record.take(0)?,
            text: record.take(1)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pong {
    pub seq: u32,
}

impl Message for Pong {
    const UID: u32 = 0x0000_0002;

    fn schema() -> MessageSchema {
        MessageSchema::builder(Self::UID, "Pong")
            .field("seq", WireType::U32)
            .build()
    }

    fn to_record(&self) -> Record {
        Record::new(Self::UID, vec![self.seq.into()])
    }

    fn from_record(mut record: Record) -> weft_core::Result<Self> {
        Ok(Self {
            seq: record.take(0)?,
        })
    }
}

/// Messages a provider receives
pub struct PingApi;

impl Interface for PingApi {
    const NAME: &'static str = "PingApi";

    fn register(registry: &mut SchemaRegistry) -> weft_core::Result<()> {
        registry.register_message::<Ping>()
    }
}

/// Messages a client receives
pub struct PongApi;

impl Interface for PongApi {
    const NAME: &'static str = "PongApi";

    fn register(registry: &mut SchemaRegistry) -> weft_core::Result<()> {
        registry.register_message::<Pong>()
    }
}

pub fn host_with(pump: &EventPump, config: HostConfig) -> ServiceHost {
    let host = ServiceHost::new(config, pump.queue());
    host.register_interface::<PingApi>(PING_API).unwrap();
    host.register_interface::<PongApi>(PONG_API).unwrap();
    host
}

pub fn host(pump: &EventPump) -> ServiceHost {
    host_with(pump, HostConfig::loopback())
}

pub fn as_link(link: &Arc<RecordingLink>) -> Arc<dyn TransportSender> {
    link.clone()
}

/// Observer that records every notification
#[derive(Default)]
pub struct Events {
    pub decline: AtomicBool,
    pub found: Mutex<Vec<RemoteService>>,
    pub incompatible: Mutex<Vec<Incompatibility>>,
    pub connected: Mutex<Vec<RemoteService>>,
    pub disconnected: Mutex<Vec<(HostId, ServiceId)>>,
}

impl ServiceObserver for Events {
    fn on_found_remote_service(&self, service: &RemoteService) -> bool {
        self.found.lock().push(*service);
        !self.decline.load(Ordering::SeqCst)
    }

    fn on_incompatible(&self, incompatibility: &Incompatibility) {
        self.incompatible.lock().push(*incompatibility);
    }

    fn on_connected(&self, service: &RemoteService) {
        self.connected.lock().push(*service);
    }

    fn on_disconnected(&self, host: HostId, service: ServiceId) {
        self.disconnected.lock().push((host, service));
    }
}

/// Handler that records messages and answers every ping with a pong
#[derive(Default)]
pub struct Inbox {
    pub received: Mutex<Vec<(ServiceId, Record)>>,
}

impl Inbox {
    pub fn len(&self) -> usize {
        self.received.lock().len()
    }
}

impl MessageHandler for Inbox {
    fn on_message(&self, ctx: &MessageContext<'_>, message: Record) -> anyhow::Result<()> {
        if message.uid() == Ping::UID {
            let ping = Ping::from_record(message.clone())?;
            ctx.reply_message(&Pong { seq: ping.seq })?;
        }
        self.received.lock().push((ctx.sender(), message));
        Ok(())
    }
}
