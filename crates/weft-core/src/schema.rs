//! Schema description
//!
//! Every message type is described once by a [`MessageSchema`]: its 32-bit
//! type id and an ordered table of fields, each carrying a [`WireType`] and a
//! [`PointerKind`]. The codec walks these tables; nothing is inferred from
//! the values themselves.

use crate::value::Message;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Reference discipline of a field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerKind {
    /// Inline, never absent
    #[default]
    Value,
    /// One byte existence flag, then the payload
    Raw,
    /// Same wire shape as `Raw`
    Unique,
    /// Reference-group key, payload on first occurrence
    Shared,
    /// Same wire shape as `Shared`, decodes to a non-owning handle
    Weak,
    /// Same wire shape as `Shared`, used for back references
    Group,
}

impl PointerKind {
    /// Kinds written with an existence flag
    pub fn is_flagged(self) -> bool {
        matches!(self, PointerKind::Raw | PointerKind::Unique)
    }

    /// Kinds written with a reference-group key
    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            PointerKind::Shared | PointerKind::Weak | PointerKind::Group
        )
    }
}

/// Underlying integer of an enumerated scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl IntWidth {
    pub fn name(self) -> &'static str {
        match self {
            IntWidth::I8 => "i8",
            IntWidth::U8 => "u8",
            IntWidth::I16 => "i16",
            IntWidth::U16 => "u16",
            IntWidth::I32 => "i32",
            IntWidth::U32 => "u32",
            IntWidth::I64 => "i64",
            IntWidth::U64 => "u64",
        }
    }

    /// Inclusive value range
    pub fn range(self) -> (i128, i128) {
        match self {
            IntWidth::I8 => (i8::MIN.into(), i8::MAX.into()),
            IntWidth::U8 => (0, u8::MAX.into()),
            IntWidth::I16 => (i16::MIN.into(), i16::MAX.into()),
            IntWidth::U16 => (0, u16::MAX.into()),
            IntWidth::I32 => (i32::MIN.into(), i32::MAX.into()),
            IntWidth::U32 => (0, u32::MAX.into()),
            IntWidth::I64 => (i64::MIN.into(), i64::MAX.into()),
            IntWidth::U64 => (0, u64::MAX.into()),
        }
    }

    pub fn contains(self, value: i128) -> bool {
        let (min, max) = self.range();
        (min..=max).contains(&value)
    }
}

/// Shape of a value on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum WireType {
    Bool,
    /// UTF-16 code unit, written as i16
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Enum(IntWidth),
    String,
    /// 100ns ticks since 1970-01-01T00:00:00
    DateTime,
    /// Nested message, by type id
    Message(u32),
    Nullable(Box<WireType>),
    Array(Box<FieldType>),
    List(Box<FieldType>),
    Set(Box<FieldType>),
    Map(Box<FieldType>, Box<FieldType>),
    /// Flattened alternative list, discriminant is the index
    Variant(Arc<[FieldType]>),
    Point3D,
    Point4D,
    Matrix3D,
    /// Named wrapper over exactly one underlying value
    Alias(String, Box<WireType>),
}

impl WireType {
    /// Width of numeric and boolean types, which take the bulk path in sequences
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            WireType::Bool | WireType::I8 | WireType::U8 => Some(1),
            WireType::I16 | WireType::U16 => Some(2),
            WireType::I32 | WireType::U32 | WireType::F32 => Some(4),
            WireType::I64 | WireType::U64 | WireType::F64 => Some(8),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireType::Bool => "bool",
            WireType::Char => "char",
            WireType::I8 => "i8",
            WireType::U8 => "u8",
            WireType::I16 => "i16",
            WireType::U16 => "u16",
            WireType::I32 => "i32",
            WireType::U32 => "u32",
            WireType::I64 => "i64",
            WireType::U64 => "u64",
            WireType::F32 => "f32",
            WireType::F64 => "f64",
            WireType::Enum(_) => "enum",
            WireType::String => "string",
            WireType::DateTime => "datetime",
            WireType::Message(_) => "message",
            WireType::Nullable(_) => "nullable",
            WireType::Array(_) => "array",
            WireType::List(_) => "list",
            WireType::Set(_) => "set",
            WireType::Map(..) => "map",
            WireType::Variant(_) => "variant",
            WireType::Point3D => "point3d",
            WireType::Point4D => "point4d",
            WireType::Matrix3D => "matrix3d",
            WireType::Alias(..) => "alias",
        }
    }

    pub fn nullable(inner: WireType) -> Self {
        WireType::Nullable(Box::new(inner))
    }

    pub fn array(element: impl Into<FieldType>) -> Self {
        WireType::Array(Box::new(element.into()))
    }

    pub fn list(element: impl Into<FieldType>) -> Self {
        WireType::List(Box::new(element.into()))
    }

    pub fn set(element: impl Into<FieldType>) -> Self {
        WireType::Set(Box::new(element.into()))
    }

    pub fn map(key: impl Into<FieldType>, value: impl Into<FieldType>) -> Self {
        WireType::Map(Box::new(key.into()), Box::new(value.into()))
    }

    pub fn variant<I, T>(alternatives: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<FieldType>,
    {
        WireType::Variant(alternatives.into_iter().map(Into::into).collect())
    }

    pub fn alias(name: impl Into<String>, inner: WireType) -> Self {
        WireType::Alias(name.into(), Box::new(inner))
    }

    /// Attach a pointer kind
    pub fn with_kind(self, kind: PointerKind) -> FieldType {
        FieldType { kind, wire: self }
    }

    pub fn raw(self) -> FieldType {
        self.with_kind(PointerKind::Raw)
    }

    pub fn unique(self) -> FieldType {
        self.with_kind(PointerKind::Unique)
    }

    pub fn shared(self) -> FieldType {
        self.with_kind(PointerKind::Shared)
    }

    pub fn weak(self) -> FieldType {
        self.with_kind(PointerKind::Weak)
    }

    pub fn group(self) -> FieldType {
        self.with_kind(PointerKind::Group)
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a WireType) -> Result<()>) -> Result<()> {
        f(self)?;
        match self {
            WireType::Nullable(inner) | WireType::Alias(_, inner) => inner.visit(f),
            WireType::Array(element) | WireType::List(element) | WireType::Set(element) => {
                element.wire.visit(f)
            }
            WireType::Map(key, value) => {
                key.wire.visit(f)?;
                value.wire.visit(f)
            }
            WireType::Variant(alternatives) => {
                for alternative in alternatives.iter() {
                    alternative.wire.visit(f)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Wire type plus pointer kind
#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub kind: PointerKind,
    pub wire: WireType,
}

impl FieldType {
    pub fn new(kind: PointerKind, wire: WireType) -> Self {
        Self { kind, wire }
    }
}

impl From<WireType> for FieldType {
    fn from(wire: WireType) -> Self {
        Self {
            kind: PointerKind::Value,
            wire,
        }
    }
}

/// One schema field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    /// Declared wire order
    pub order: u32,
    pub ty: FieldType,
}

/// Field table of one message type, sorted by declared order
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSchema {
    uid: u32,
    name: String,
    fields: Vec<FieldSchema>,
}

impl MessageSchema {
    pub fn builder(uid: u32, name: impl Into<String>) -> MessageSchemaBuilder {
        MessageSchemaBuilder {
            uid,
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in wire order
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }
}

/// Builder for [`MessageSchema`]
#[derive(Debug)]
pub struct MessageSchemaBuilder {
    uid: u32,
    name: String,
    fields: Vec<FieldSchema>,
}

impl MessageSchemaBuilder {
    /// Append a field; its order is its position among the fields added so far
    pub fn field(self, name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        let order = self.fields.len() as u32;
        self.field_at(order, name, ty)
    }

    /// Add a field with an explicit wire order
    pub fn field_at(mut self, order: u32, name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            order,
            ty: ty.into(),
        });
        self
    }

    pub fn build(mut self) -> MessageSchema {
        self.fields.sort_by_key(|field| field.order);
        MessageSchema {
            uid: self.uid,
            name: self.name,
            fields: self.fields,
        }
    }
}

/// All message schemas known to one codec
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<u32, Arc<MessageSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema; each type id at most once
    pub fn register(&mut self, schema: MessageSchema) -> Result<()> {
        if self.schemas.contains_key(&schema.uid) {
            return Err(Error::DuplicateSchema(schema.uid));
        }
        self.schemas.insert(schema.uid, Arc::new(schema));
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, schema: MessageSchema) -> Result<Self> {
        self.register(schema)?;
        Ok(self)
    }

    /// Register the schema of a typed message
    pub fn register_message<M: Message>(&mut self) -> Result<()> {
        let schema = M::schema();
        debug_assert_eq!(schema.uid, M::UID);
        self.register(schema)
    }

    pub fn get(&self, uid: u32) -> Result<&Arc<MessageSchema>> {
        self.schemas.get(&uid).ok_or(Error::UnknownSchema(uid))
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.schemas.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn uids(&self) -> impl Iterator<Item = u32> + '_ {
        self.schemas.keys().copied()
    }

    /// Check that every nested message is registered and every variant is
    /// addressable by a one byte discriminant.
    pub fn validate(&self) -> Result<()> {
        for schema in self.schemas.values() {
            for field in &schema.fields {
                field.ty.wire.visit(&mut |wire| match wire {
                    WireType::Message(uid) if !self.schemas.contains_key(uid) => {
                        Err(Error::UnknownSchema(*uid))
                    }
                    WireType::Variant(alternatives) if alternatives.len() > 256 => {
                        Err(Error::TooManyAlternatives(alternatives.len()))
                    }
                    _ => Ok(()),
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sorts_by_order() {
        let schema = MessageSchema::builder(1, "Sample")
            .field_at(2, "c", WireType::String)
            .field_at(0, "a", WireType::I32)
            .field_at(1, "b", WireType::Bool.raw())
            .build();

        let names: Vec<_> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(schema.field_index("c"), Some(2));
        assert_eq!(schema.fields()[1].ty.kind, PointerKind::Raw);
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(MessageSchema::builder(7, "A").build())
            .unwrap();
        assert_eq!(
            registry.register(MessageSchema::builder(7, "B").build()),
            Err(Error::DuplicateSchema(7))
        );
    }

    #[test]
    fn test_validate_unknown_nested() {
        let registry = SchemaRegistry::new()
            .with(
                MessageSchema::builder(1, "Outer")
                    .field("inner", WireType::list(WireType::Message(2)))
                    .build(),
            )
            .unwrap();
        assert_eq!(registry.validate(), Err(Error::UnknownSchema(2)));
    }

    #[test]
    fn test_validate_variant_arity() {
        let alternatives = vec![FieldType::from(WireType::I32); 257];
        let registry = SchemaRegistry::new()
            .with(
                MessageSchema::builder(1, "Wide")
                    .field("v", WireType::variant(alternatives))
                    .build(),
            )
            .unwrap();
        assert_eq!(registry.validate(), Err(Error::TooManyAlternatives(257)));
    }

    #[test]
    fn test_fixed_width() {
        assert_eq!(WireType::Bool.fixed_width(), Some(1));
        assert_eq!(WireType::F64.fixed_width(), Some(8));
        assert_eq!(WireType::String.fixed_width(), None);
        assert_eq!(WireType::Enum(IntWidth::U16).fixed_width(), None);
    }

    #[test]
    fn test_int_width_range() {
        assert!(IntWidth::U8.contains(255));
        assert!(!IntWidth::U8.contains(256));
        assert!(IntWidth::I64.contains(i64::MIN.into()));
        assert!(!IntWidth::U64.contains(-1));
    }
}
