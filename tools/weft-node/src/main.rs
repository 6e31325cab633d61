//! Weft Node
//!
//! Runs a service host on the local network with either an echo provider,
//! which answers every request, or an echo client, which connects to every
//! provider it discovers and sends a request each tick.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use weft_core::{Message, MessageSchema, Record, SchemaRegistry, WireType};
use weft_service::{
    HostConfig, Interface, MessageContext, MessageHandler, RemoteService, Service, ServiceHost,
    ServiceId, ServiceObserver, ServiceTypeId,
};
use weft_transport::EventPump;

const ECHO_SERVICE: ServiceTypeId = ServiceTypeId(0x4543_484f);
const ECHO_REQUESTS: u32 = 0x4543_5251;
const ECHO_REPLIES: u32 = 0x4543_5250;

#[derive(Parser)]
#[command(name = "weft-node")]
#[command(about = "Weft service host with an echo provider or client")]
#[command(version)]
struct Cli {
    /// Host config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Announcement and send interval in milliseconds
    #[arg(short, long, default_value = "1000")]
    interval: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer echo requests
    Provider {
        /// Fixed listen port (0 = any)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Tag advertised with the provider
        #[arg(short, long, default_value = "0")]
        tag: u16,
    },

    /// Send echo requests to every provider found
    Client {
        /// Request text
        #[arg(short, long, default_value = "hello")]
        text: String,
    },
}

// ============================================================================
// Echo service
// ============================================================================

#[derive(Debug, Clone)]
struct EchoRequest {
    seq: u32,
    text: String,
}

impl Message for EchoRequest {
    const UID: u32 = 0x0000_0001;

    fn schema() -> MessageSchema {
        MessageSchema::builder(Self::UID, "EchoRequest")
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

#[derive(Debug, Clone)]
struct EchoReply {
    seq: u32,
    text: String,
}

impl Message for EchoReply {
    const UID: u32 = 0x0000_0002;

    fn schema() -> MessageSchema {
        MessageSchema::builder(Self::UID, "EchoReply")
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

struct Requests;

impl Interface for Requests {
    const NAME: &'static str = "EchoRequests";

    fn register(registry: &mut SchemaRegistry) -> weft_core::Result<()> {
        registry.register_message::<EchoRequest>()
    }
}

struct Replies;

impl Interface for Replies {
    const NAME: &'static str = "EchoReplies";

    fn register(registry: &mut SchemaRegistry) -> weft_core::Result<()> {
        registry.register_message::<EchoReply>()
    }
}

struct Echo;

impl MessageHandler for Echo {
    fn on_message(&self, ctx: &MessageContext<'_>, message: Record) -> anyhow::Result<()> {
        let request = EchoRequest::from_record(message)?;
        info!("#{} from {}: {}", request.seq, ctx.sender(), request.text);
        ctx.reply_message(&EchoReply {
            seq: request.seq,
            text: request.text,
        })?;
        Ok(())
    }
}

struct PrintReplies;

impl MessageHandler for PrintReplies {
    fn on_message(&self, ctx: &MessageContext<'_>, message: Record) -> anyhow::Result<()> {
        let reply = EchoReply::from_record(message)?;
        info!("Reply #{} from {}: {}", reply.seq, ctx.sender(), reply.text);
        Ok(())
    }
}

struct LogPeers;

impl ServiceObserver for LogPeers {
    fn on_found_remote_service(&self, service: &RemoteService) -> bool {
        info!(
            "Found provider {} (tag {}) on {:?}",
            service.service_id, service.service_tag, service.address
        );
        true
    }

    fn on_connected(&self, service: &RemoteService) {
        info!("Connected to {} on host {}", service.service_id, service.host_id);
    }

    fn on_disconnected(&self, host: weft_service::HostId, service: ServiceId) {
        info!("Disconnected from {} on host {}", service, host);
    }
}

// ============================================================================
// Main
// ============================================================================

fn load_config(path: Option<&PathBuf>) -> Result<HostConfig> {
    match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(HostConfig::from_toml_str(&source)?)
        }
        None => Ok(HostConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(cli.config.as_ref())?;
    let mut pump = EventPump::new();
    let host = ServiceHost::new(config, pump.queue());
    host.register_interface::<Requests>(ECHO_REQUESTS)?;
    host.register_interface::<Replies>(ECHO_REPLIES)?;
    host.start()?;
    info!("Host {} announcing on {:?}", host.host_id(), host.multicast_addrs());

    let interval = Duration::from_millis(cli.interval);
    match cli.command {
        Commands::Provider { port, tag } => {
            let provider = Service::<Replies, Requests>::create(
                host.provider(ECHO_SERVICE)
                    .port(port)
                    .tag(tag)
                    .handler(Arc::new(Echo)),
            )
            .await?;
            provider.start();
            info!(
                "Echo provider {} listening on port {}",
                provider.service_id(),
                provider.endpoint().listen_port()?
            );
            run(&host, &mut pump, interval, || Ok(())).await?;
            provider.endpoint().close();
        }
        Commands::Client { text } => {
            let client = Service::<Requests, Replies>::create(
                host.client(ECHO_SERVICE)
                    .observer(Arc::new(LogPeers))
                    .handler(Arc::new(PrintReplies)),
            )
            .await?;
            client.start();
            let mut seq = 0u32;
            run(&host, &mut pump, interval, || {
                if client.connected_count() > 0 {
                    seq = seq.wrapping_add(1);
                    client.broadcast(&EchoRequest {
                        seq,
                        text: text.clone(),
                    })?;
                }
                Ok(())
            })
            .await?;
            client.endpoint().close();
        }
    }

    host.stop();
    Ok(())
}

/// Publish, tick and pump until interrupted
async fn run(
    host: &ServiceHost,
    pump: &mut EventPump,
    interval: Duration,
    mut tick: impl FnMut() -> Result<()>,
) -> Result<()> {
    loop {
        host.publish()?;
        tick()?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
            ran = pump.drain(interval, interval) => {
                if let Err(e) = ran {
                    warn!("Event handler failed: {:#}", e);
                }
            }
        }
    }
}
