//! Weft Core
//!
//! Schema-driven binary codec for the Weft service substrate.
//!
//! This crate provides:
//! - Schema description ([`MessageSchema`], [`WireType`], [`PointerKind`])
//! - Dynamic values and typed messages ([`Value`], [`Record`], [`Message`])
//! - The byte buffer and length varint ([`MessageStream`], [`StreamReader`])
//! - Shared-reference tracking per message ([`Group`])
//! - Tagged unions ([`Variant`])
//! - The codec itself ([`Codec`]) and stream framing ([`frame`])

pub mod codec;
pub mod error;
pub mod frame;
pub mod group;
pub mod math;
pub mod schema;
pub mod stream;
pub mod time;
pub mod value;
pub mod variant;

pub use codec::Codec;
pub use error::{Error, ErrorCategory, Result};
pub use group::{Group, MAX_NESTING};
pub use math::{Matrix3D, Point3D, Point4D};
pub use schema::{
    FieldSchema, FieldType, IntWidth, MessageSchema, MessageSchemaBuilder, PointerKind,
    SchemaRegistry, WireType,
};
pub use stream::{MessageStream, StreamReader};
pub use value::{FromValue, Message, Record, SharedRef, Value, WeakRef};
pub use variant::Variant;

/// Protocol version sent in every handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Default UDP port for discovery announcements
pub const DEFAULT_MULTICAST_PORT: u16 = 0x700;
