//! Weft Binary Codec
//!
//! Schema-driven encoding of [`Record`]s. The wire form carries no field
//! names or type tags: both sides must hold the same schema for a message
//! type id, and fields are written in schema order.
//!
//! ```text
//! message  = uid:u32 field*
//! field    = inline value          (Value)
//!          | exists:u8 value?      (Raw, Unique)
//!          | key:u16 value?        (Shared, Weak, Group; value only on first sight, 0 = absent)
//! sequence = len:varint element*
//! map      = len:varint (key value)*
//! variant  = which:u8 value
//! ```
//!
//! Every top-level call uses a fresh [`Group`], so reference keys never
//! leak across messages.

use crate::group::Group;
use crate::math::{Matrix3D, Point3D, Point4D};
use crate::schema::{FieldSchema, FieldType, IntWidth, PointerKind, SchemaRegistry, WireType};
use crate::stream::{MessageStream, StreamReader};
use crate::time;
use crate::value::{mismatch, Message, Record, SharedRef, Value};
use crate::variant::Variant;
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Encoder/decoder bound to one validated schema registry
#[derive(Debug, Clone)]
pub struct Codec {
    registry: Arc<SchemaRegistry>,
}

impl Codec {
    /// Validate `registry` and build a codec over it
    pub fn new(registry: SchemaRegistry) -> Result<Self> {
        registry.validate()?;
        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    // ========================================================================
    // PUBLIC API
    // ========================================================================

    /// Encode a record as `uid` followed by its fields
    pub fn encode_message(&self, record: &Record) -> Result<Bytes> {
        let mut stream = MessageStream::new();
        stream.write_u32(record.uid());
        let mut group = Group::new();
        self.encode_record(&mut stream, record, &mut group)?;
        Ok(stream.into_bytes())
    }

    /// Decode a message produced by [`encode_message`](Self::encode_message).
    /// Trailing bytes are ignored.
    pub fn decode_message(&self, data: &[u8]) -> Result<Record> {
        let mut reader = StreamReader::new(data);
        let uid = reader.read_u32()?;
        let mut group = Group::new();
        self.decode_record(&mut reader, uid, &mut group)
    }

    /// Encode a typed message
    pub fn encode<M: Message>(&self, message: &M) -> Result<Bytes> {
        self.encode_message(&message.to_record())
    }

    /// Decode a typed message, rejecting other type ids
    pub fn decode<M: Message>(&self, data: &[u8]) -> Result<M> {
        let record = self.decode_message(data)?;
        if record.uid() != M::UID {
            return Err(Error::MessageMismatch {
                expected: M::UID,
                found: record.uid(),
            });
        }
        M::from_record(record)
    }

    /// Message type id at the head of an encoded message
    pub fn peek_uid(data: &[u8]) -> Result<u32> {
        StreamReader::new(data).read_u32()
    }

    // ========================================================================
    // FIELD LEVEL
    // ========================================================================

    /// Encode one value, honouring the pointer kind of `ty`
    pub fn encode_value(
        &self,
        stream: &mut MessageStream,
        value: &Value,
        ty: &FieldType,
        group: &mut Group,
    ) -> Result<()> {
        match ty.kind {
            PointerKind::Value => self.encode_wire(stream, value, &ty.wire, group),
            PointerKind::Raw | PointerKind::Unique => {
                if value.is_null() {
                    stream.write_bool(false);
                    return Ok(());
                }
                stream.write_bool(true);
                self.encode_wire(stream, value, &ty.wire, group)
            }
            PointerKind::Shared | PointerKind::Weak | PointerKind::Group => {
                let target = match value {
                    Value::Null => None,
                    Value::Shared(shared) => Some(shared.clone()),
                    Value::Weak(weak) => weak.upgrade(),
                    other => return Err(mismatch("reference", other)),
                };
                let Some(target) = target else {
                    stream.write_u16(0);
                    return Ok(());
                };
                let (key, is_new) = group.assign(&target)?;
                stream.write_u16(key);
                if is_new {
                    let payload = target.read();
                    self.encode_wire(stream, &payload, &ty.wire, group)?;
                }
                Ok(())
            }
        }
    }

    /// Decode one value, honouring the pointer kind of `ty`
    pub fn decode_value(
        &self,
        reader: &mut StreamReader<'_>,
        ty: &FieldType,
        group: &mut Group,
    ) -> Result<Value> {
        match ty.kind {
            PointerKind::Value => self.decode_wire(reader, &ty.wire, group),
            PointerKind::Raw | PointerKind::Unique => {
                if reader.read_bool()? {
                    self.decode_wire(reader, &ty.wire, group)
                } else {
                    Ok(Value::Null)
                }
            }
            PointerKind::Shared | PointerKind::Weak | PointerKind::Group => {
                let key = reader.read_u16()?;
                if key == 0 {
                    return Ok(Value::Null);
                }
                let target = if let Some(existing) = group.get(key).cloned() {
                    existing
                } else {
                    // register before the payload so back references resolve
                    let cell = SharedRef::new(Value::Null);
                    group.insert(key, cell.clone());
                    let payload = self.decode_wire(reader, &ty.wire, group)?;
                    cell.set(payload);
                    cell
                };
                Ok(match ty.kind {
                    PointerKind::Weak => Value::Weak(target.downgrade()),
                    _ => Value::Shared(target),
                })
            }
        }
    }

    // ========================================================================
    // WIRE TYPES
    // ========================================================================

    fn encode_wire(
        &self,
        stream: &mut MessageStream,
        value: &Value,
        wire: &WireType,
        group: &mut Group,
    ) -> Result<()> {
        match (wire, value) {
            (WireType::Bool, Value::Bool(v)) => stream.write_bool(*v),
            (WireType::Char, Value::Char(v)) => stream.write_i16(*v as i16),
            (WireType::I8, Value::I8(v)) => stream.write_i8(*v),
            (WireType::U8, Value::U8(v)) => stream.write_u8(*v),
            (WireType::I16, Value::I16(v)) => stream.write_i16(*v),
            (WireType::U16, Value::U16(v)) => stream.write_u16(*v),
            (WireType::I32, Value::I32(v)) => stream.write_i32(*v),
            (WireType::U32, Value::U32(v)) => stream.write_u32(*v),
            (WireType::I64, Value::I64(v)) => stream.write_i64(*v),
            (WireType::U64, Value::U64(v)) => stream.write_u64(*v),
            (WireType::F32, Value::F32(v)) => stream.write_f32(*v),
            (WireType::F64, Value::F64(v)) => stream.write_f64(*v),
            (WireType::Enum(width), Value::Enum(v)) => write_enum(stream, *width, *v)?,
            (WireType::String, Value::String(s)) => stream.write_str(s)?,
            // absent string travels as empty
            (WireType::String, Value::Null) => stream.write_length(0),
            (WireType::DateTime, Value::DateTime(instant)) => {
                stream.write_u64(time::to_ticks(instant)?)
            }
            (WireType::Message(uid), Value::Message(record)) => {
                if record.uid() != *uid {
                    return Err(Error::MessageMismatch {
                        expected: *uid,
                        found: record.uid(),
                    });
                }
                self.encode_record(stream, record, group)?
            }
            (WireType::Nullable(inner) | WireType::Alias(_, inner), value) => {
                self.encode_wire(stream, value, inner, group)?
            }
            (
                WireType::Array(element) | WireType::List(element) | WireType::Set(element),
                Value::List(items),
            ) => self.encode_sequence(stream, items, element, group)?,
            (WireType::Map(key_ty, value_ty), Value::Map(entries)) => {
                stream.write_len(entries.len())?;
                for (key, value) in entries {
                    self.encode_value(stream, key, key_ty, group)?;
                    self.encode_value(stream, value, value_ty, group)?;
                }
            }
            (WireType::Variant(alternatives), Value::Variant(variant)) => {
                let (index, held) = variant.held().ok_or(Error::VariantEmpty)?;
                let alternative = alternatives.get(index).ok_or(Error::NotAnAlternative)?;
                let which = u8::try_from(index)
                    .map_err(|_| Error::TooManyAlternatives(alternatives.len()))?;
                stream.write_u8(which);
                self.encode_value(stream, held, alternative, group)?
            }
            (WireType::Point3D, Value::Point3D(p)) => write_narrowed(stream, &p.to_array()),
            (WireType::Point4D, Value::Point4D(p)) => write_narrowed(stream, &p.to_array()),
            (WireType::Matrix3D, Value::Matrix3D(m)) => write_narrowed(stream, &m.to_array()),
            (wire, value) => return Err(mismatch(wire.name(), value)),
        }
        Ok(())
    }

    fn decode_wire(
        &self,
        reader: &mut StreamReader<'_>,
        wire: &WireType,
        group: &mut Group,
    ) -> Result<Value> {
        Ok(match wire {
            WireType::Bool => Value::Bool(reader.read_bool()?),
            WireType::Char => Value::Char(reader.read_i16()? as u16),
            WireType::I8 => Value::I8(reader.read_i8()?),
            WireType::U8 => Value::U8(reader.read_u8()?),
            WireType::I16 => Value::I16(reader.read_i16()?),
            WireType::U16 => Value::U16(reader.read_u16()?),
            WireType::I32 => Value::I32(reader.read_i32()?),
            WireType::U32 => Value::U32(reader.read_u32()?),
            WireType::I64 => Value::I64(reader.read_i64()?),
            WireType::U64 => Value::U64(reader.read_u64()?),
            WireType::F32 => Value::F32(reader.read_f32()?),
            WireType::F64 => Value::F64(reader.read_f64()?),
            WireType::Enum(width) => Value::Enum(read_enum(reader, *width)?),
            WireType::String => Value::String(reader.read_string()?),
            WireType::DateTime => Value::DateTime(time::from_ticks(reader.read_u64()?)?),
            WireType::Message(uid) => Value::Message(self.decode_record(reader, *uid, group)?),
            WireType::Nullable(inner) | WireType::Alias(_, inner) => {
                self.decode_wire(reader, inner, group)?
            }
            WireType::Array(element) | WireType::List(element) => {
                Value::List(self.decode_sequence(reader, element, group)?)
            }
            WireType::Set(element) => {
                let items = self.decode_sequence(reader, element, group)?;
                let keep: Vec<bool> = {
                    let mut seen = HashSet::with_capacity(items.len());
                    items.iter().map(|item| seen.insert(item)).collect()
                };
                Value::List(
                    items
                        .into_iter()
                        .zip(keep)
                        .filter_map(|(item, first)| first.then_some(item))
                        .collect(),
                )
            }
            WireType::Map(key_ty, value_ty) => {
                let len = reader.read_len()?;
                let mut entries: Vec<(Value, Value)> = Vec::with_capacity(len.min(reader.remaining()));
                let mut index: HashMap<Value, usize> = HashMap::new();
                for _ in 0..len {
                    let key = self.decode_value(reader, key_ty, group)?;
                    let value = self.decode_value(reader, value_ty, group)?;
                    // last write wins on a repeated key
                    match index.get(&key).copied() {
                        Some(slot) => entries[slot].1 = value,
                        None => {
                            index.insert(key.clone(), entries.len());
                            entries.push((key, value));
                        }
                    }
                }
                Value::Map(entries)
            }
            WireType::Variant(alternatives) => {
                let which = reader.read_u8()?;
                let alternative =
                    alternatives
                        .get(which as usize)
                        .ok_or(Error::InvalidDiscriminant {
                            index: which,
                            count: alternatives.len(),
                        })?;
                let held = self.decode_value(reader, alternative, group)?;
                Value::Variant(Variant::from_parts(alternatives.clone(), which as usize, held))
            }
            WireType::Point3D => {
                let [x, y, z] = read_widened::<3>(reader)?;
                Value::Point3D(Point3D::new(x, y, z))
            }
            WireType::Point4D => {
                let [x, y, z, w] = read_widened::<4>(reader)?;
                Value::Point4D(Point4D::new(x, y, z, w))
            }
            WireType::Matrix3D => {
                Value::Matrix3D(Box::new(Matrix3D::from_array(read_widened::<16>(reader)?)))
            }
        })
    }

    fn encode_record(
        &self,
        stream: &mut MessageStream,
        record: &Record,
        group: &mut Group,
    ) -> Result<()> {
        let schema = self.registry.get(record.uid())?;
        let fields = schema.fields();
        if fields.len() != record.fields().len() {
            return Err(Error::FieldCount {
                uid: record.uid(),
                expected: fields.len(),
                have: record.fields().len(),
            });
        }
        group.enter()?;
        let result = self.encode_fields(stream, fields, record.fields(), group);
        group.leave();
        result
    }

    fn encode_fields(
        &self,
        stream: &mut MessageStream,
        fields: &[FieldSchema],
        values: &[Value],
        group: &mut Group,
    ) -> Result<()> {
        for (field, value) in fields.iter().zip(values) {
            self.encode_value(stream, value, &field.ty, group)?;
        }
        Ok(())
    }

    fn decode_record(
        &self,
        reader: &mut StreamReader<'_>,
        uid: u32,
        group: &mut Group,
    ) -> Result<Record> {
        let schema = self.registry.get(uid)?;
        group.enter()?;
        let fields = self.decode_fields(reader, schema.fields(), group);
        group.leave();
        Ok(Record::new(uid, fields?))
    }

    fn decode_fields(
        &self,
        reader: &mut StreamReader<'_>,
        fields: &[FieldSchema],
        group: &mut Group,
    ) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(self.decode_value(reader, &field.ty, group)?);
        }
        Ok(values)
    }

    fn encode_sequence(
        &self,
        stream: &mut MessageStream,
        items: &[Value],
        element: &FieldType,
        group: &mut Group,
    ) -> Result<()> {
        stream.write_len(items.len())?;
        if let Some(width) = bulk_width(element) {
            stream.reserve(items.len().saturating_mul(width));
            for item in items {
                self.encode_wire(stream, item, &element.wire, group)?;
            }
            return Ok(());
        }
        for item in items {
            self.encode_value(stream, item, element, group)?;
        }
        Ok(())
    }

    fn decode_sequence(
        &self,
        reader: &mut StreamReader<'_>,
        element: &FieldType,
        group: &mut Group,
    ) -> Result<Vec<Value>> {
        let len = reader.read_len()?;
        if let Some(width) = bulk_width(element) {
            let total = len
                .checked_mul(width)
                .ok_or(Error::LengthOverflow(len as u64))?;
            reader.need(total)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(self.decode_wire(reader, &element.wire, group)?);
            }
            return Ok(items);
        }
        // capacity hint bounded by the input size
        let mut items = Vec::with_capacity(len.min(reader.remaining()));
        for _ in 0..len {
            items.push(self.decode_value(reader, element, group)?);
        }
        Ok(items)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Element width for sequences of inline fixed-width scalars
fn bulk_width(element: &FieldType) -> Option<usize> {
    match element.kind {
        PointerKind::Value => element.wire.fixed_width(),
        _ => None,
    }
}

fn write_enum(stream: &mut MessageStream, width: IntWidth, value: i128) -> Result<()> {
    if !width.contains(value) {
        return Err(Error::ValueOutOfRange {
            value,
            width: width.name(),
        });
    }
    match width {
        IntWidth::I8 => stream.write_i8(value as i8),
        IntWidth::U8 => stream.write_u8(value as u8),
        IntWidth::I16 => stream.write_i16(value as i16),
        IntWidth::U16 => stream.write_u16(value as u16),
        IntWidth::I32 => stream.write_i32(value as i32),
        IntWidth::U32 => stream.write_u32(value as u32),
        IntWidth::I64 => stream.write_i64(value as i64),
        IntWidth::U64 => stream.write_u64(value as u64),
    }
    Ok(())
}

fn read_enum(reader: &mut StreamReader<'_>, width: IntWidth) -> Result<i128> {
    Ok(match width {
        IntWidth::I8 => reader.read_i8()?.into(),
        IntWidth::U8 => reader.read_u8()?.into(),
        IntWidth::I16 => reader.read_i16()?.into(),
        IntWidth::U16 => reader.read_u16()?.into(),
        IntWidth::I32 => reader.read_i32()?.into(),
        IntWidth::U32 => reader.read_u32()?.into(),
        IntWidth::I64 => reader.read_i64()?.into(),
        IntWidth::U64 => reader.read_u64()?.into(),
    })
}

fn write_narrowed(stream: &mut MessageStream, components: &[f64]) {
    stream.reserve(components.len() * 4);
    for component in components {
        stream.write_f32(*component as f32);
    }
}

fn read_widened<const N: usize>(reader: &mut StreamReader<'_>) -> Result<[f64; N]> {
    reader.need(N * 4)?;
    let mut out = [0.0; N];
    for slot in &mut out {
        *slot = f64::from(reader.read_f32()?);
    }
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================
