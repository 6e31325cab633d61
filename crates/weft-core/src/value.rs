//! Value tree handled by the codec
//!
//! A [`Value`] is what a schema field holds in memory. Shared and weak
//! references point at [`SharedRef`] cells so that one object can appear in
//! several fields, or reference itself, and still be written once.

use crate::math::{Matrix3D, Point3D, Point4D};
use crate::schema::{FieldType, MessageSchema, PointerKind, WireType};
use crate::variant::Variant;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::{Arc, Weak};

/// Owning handle to a value that may be referenced from several places
#[derive(Clone)]
pub struct SharedRef(Arc<RwLock<Value>>);

impl SharedRef {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(Arc::new(RwLock::new(value.into())))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.0.read_recursive()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Value> {
        self.0.write()
    }

    /// Replace the held value
    pub fn set(&self, value: impl Into<Value>) {
        *self.0.write() = value.into();
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &SharedRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakRef {
        WeakRef(Arc::downgrade(&self.0))
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for SharedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedRef({:#x})", self.addr())
    }
}

/// Non-owning handle to a [`SharedRef`] cell
#[derive(Clone, Default)]
pub struct WeakRef(Weak<RwLock<Value>>);

impl WeakRef {
    /// A handle that never upgrades
    pub fn new() -> Self {
        Self(Weak::new())
    }

    pub fn upgrade(&self) -> Option<SharedRef> {
        self.0.upgrade().map(SharedRef)
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(target) => write!(f, "WeakRef({:#x})", target.addr()),
            None => f.write_str("WeakRef(dangling)"),
        }
    }
}

/// Field value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent pointer
    #[default]
    Null,
    Bool(bool),
    /// UTF-16 code unit
    Char(u16),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Enumerated scalar, range-checked against its declared width on encode
    Enum(i128),
    String(String),
    DateTime(DateTime<Utc>),
    Message(Record),
    /// Array, list or set
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Variant(Variant),
    Point3D(Point3D),
    Point4D(Point4D),
    Matrix3D(Box<Matrix3D>),
    Shared(SharedRef),
    Weak(WeakRef),
}

impl Value {
    /// Wrap a value in a fresh shared cell
    pub fn shared(value: impl Into<Value>) -> Value {
        Value::Shared(SharedRef::new(value))
    }

    /// Map from key/value pairs, in iteration order
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Value
    where
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_shared(&self) -> Option<&SharedRef> {
        match self {
            Value::Shared(shared) => Some(shared),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Message(record) => Some(record),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::I8(_) => "i8",
            Value::U8(_) => "u8",
            Value::I16(_) => "i16",
            Value::U16(_) => "u16",
            Value::I32(_) => "i32",
            Value::U32(_) => "u32",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Enum(_) => "enum",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Message(_) => "message",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Variant(_) => "variant",
            Value::Point3D(_) => "point3d",
            Value::Point4D(_) => "point4d",
            Value::Matrix3D(_) => "matrix3d",
            Value::Shared(_) => "shared",
            Value::Weak(_) => "weak",
        }
    }

    /// Whether this value can be encoded as `ty`.
    ///
    /// Referenced cells are not inspected, so cyclic graphs are fine.
    pub fn conforms(&self, ty: &FieldType) -> bool {
        match (ty.kind, self) {
            (PointerKind::Value, _) => self.conforms_wire(&ty.wire),
            (kind, Value::Null) => kind.is_flagged() || kind.is_keyed(),
            (kind, Value::Shared(_) | Value::Weak(_)) => kind.is_keyed(),
            (kind, _) if kind.is_keyed() => false,
            _ => self.conforms_wire(&ty.wire),
        }
    }

    /// Whether this value has the shape of `wire`, ignoring pointer kind
    pub fn conforms_wire(&self, wire: &WireType) -> bool {
        match (wire, self) {
            (WireType::Bool, Value::Bool(_))
            | (WireType::Char, Value::Char(_))
            | (WireType::I8, Value::I8(_))
            | (WireType::U8, Value::U8(_))
            | (WireType::I16, Value::I16(_))
            | (WireType::U16, Value::U16(_))
            | (WireType::I32, Value::I32(_))
            | (WireType::U32, Value::U32(_))
            | (WireType::I64, Value::I64(_))
            | (WireType::U64, Value::U64(_))
            | (WireType::F32, Value::F32(_))
            | (WireType::F64, Value::F64(_))
            | (WireType::String, Value::String(_) | Value::Null)
            | (WireType::DateTime, Value::DateTime(_))
            | (WireType::Variant(_), Value::Variant(_))
            | (WireType::Point3D, Value::Point3D(_))
            | (WireType::Point4D, Value::Point4D(_))
            | (WireType::Matrix3D, Value::Matrix3D(_)) => true,
            (WireType::Enum(width), Value::Enum(value)) => width.contains(*value),
            (WireType::Message(uid), Value::Message(record)) => record.uid() == *uid,
            (WireType::Nullable(inner) | WireType::Alias(_, inner), value) => {
                value.conforms_wire(inner)
            }
            (
                WireType::Array(element) | WireType::List(element) | WireType::Set(element),
                Value::List(items),
            ) => items.iter().all(|item| item.conforms(element)),
            (WireType::Map(key, value), Value::Map(entries)) => entries
                .iter()
                .all(|(k, v)| k.conforms(key) && v.conforms(value)),
            _ => false,
        }
    }

    /// Structural equality that treats a pair of cells already under
    /// comparison as equal, so cycles terminate.
    fn eq_graph(&self, other: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Message(a), Value::Message(b)) => {
                a.uid == b.uid && eq_slices(&a.fields, &b.fields, seen)
            }
            (Value::List(a), Value::List(b)) => eq_slices(a, b, seen),
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(ka, va)| {
                        b.iter()
                            .any(|(kb, vb)| ka.eq_graph(kb, seen) && va.eq_graph(vb, seen))
                    })
            }
            (Value::Variant(a), Value::Variant(b)) => match (a.held(), b.held()) {
                (Some((ia, va)), Some((ib, vb))) => ia == ib && va.eq_graph(vb, seen),
                (None, None) => true,
                _ => false,
            },
            (Value::Point3D(a), Value::Point3D(b)) => eq_bits(&a.to_array(), &b.to_array()),
            (Value::Point4D(a), Value::Point4D(b)) => eq_bits(&a.to_array(), &b.to_array()),
            (Value::Matrix3D(a), Value::Matrix3D(b)) => eq_bits(&a.to_array(), &b.to_array()),
            (Value::Shared(a), Value::Shared(b)) => eq_cells(a, b, seen),
            (Value::Weak(a), Value::Weak(b)) => match (a.upgrade(), b.upgrade()) {
                (Some(a), Some(b)) => eq_cells(&a, &b, seen),
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

fn eq_slices(a: &[Value], b: &[Value], seen: &mut Vec<(usize, usize)>) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_graph(y, seen))
}

fn eq_bits(a: &[f64], b: &[f64]) -> bool {
    a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

fn eq_cells(a: &SharedRef, b: &SharedRef, seen: &mut Vec<(usize, usize)>) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    let pair = (a.addr(), b.addr());
    if seen.contains(&pair) {
        return true;
    }
    seen.push(pair);
    let left = a.read();
    let right = b.read();
    left.eq_graph(&right, seen)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_graph(other, &mut Vec::new())
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null | Value::Shared(_) | Value::Weak(_) => {}
            Value::Bool(v) => v.hash(state),
            Value::Char(v) => v.hash(state),
            Value::I8(v) => v.hash(state),
            Value::U8(v) => v.hash(state),
            Value::I16(v) => v.hash(state),
            Value::U16(v) => v.hash(state),
            Value::I32(v) => v.hash(state),
            Value::U32(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::U64(v) => v.hash(state),
            Value::F32(v) => v.to_bits().hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::Enum(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::Message(record) => record.hash(state),
            Value::List(items) => items.hash(state),
            // equality ignores entry order
            Value::Map(entries) => entries.len().hash(state),
            Value::Variant(variant) => variant.hash(state),
            Value::Point3D(p) => hash_bits(&p.to_array(), state),
            Value::Point4D(p) => hash_bits(&p.to_array(), state),
            Value::Matrix3D(m) => hash_bits(&m.to_array(), state),
        }
    }
}

fn hash_bits<H: Hasher>(values: &[f64], state: &mut H) {
    for value in values {
        value.to_bits().hash(state);
    }
}

/// Decoded or to-be-encoded message: a type id plus one value per schema field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    uid: u32,
    fields: Vec<Value>,
}

impl Record {
    pub fn new(uid: u32, fields: Vec<Value>) -> Self {
        Self { uid, fields }
    }

    /// Record with a default for every field. Nested messages and pointer
    /// fields start as [`Value::Null`] and must be filled before encoding.
    pub fn from_schema(schema: &MessageSchema) -> Self {
        let fields = schema
            .fields()
            .iter()
            .map(|field| match field.ty.kind {
                PointerKind::Value => default_for(&field.ty.wire),
                _ => Value::Null,
            })
            .collect();
        Self {
            uid: schema.uid(),
            fields,
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [Value] {
        &mut self.fields
    }

    pub fn into_fields(self) -> Vec<Value> {
        self.fields
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    /// Set a field by name
    pub fn set(
        &mut self,
        schema: &MessageSchema,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let index = schema
            .field_index(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))?;
        let have = self.fields.len();
        let slot = self.fields.get_mut(index).ok_or(Error::FieldCount {
            uid: self.uid,
            expected: schema.fields().len(),
            have,
        })?;
        *slot = value.into();
        Ok(())
    }

    /// Move a field out, converting it
    pub fn take<T: FromValue>(&mut self, index: usize) -> Result<T> {
        let have = self.fields.len();
        let slot = self.fields.get_mut(index).ok_or(Error::FieldCount {
            uid: self.uid,
            expected: index + 1,
            have,
        })?;
        T::from_value(std::mem::take(slot))
    }
}

fn default_for(wire: &WireType) -> Value {
    match wire {
        WireType::Bool => Value::Bool(false),
        WireType::Char => Value::Char(0),
        WireType::I8 => Value::I8(0),
        WireType::U8 => Value::U8(0),
        WireType::I16 => Value::I16(0),
        WireType::U16 => Value::U16(0),
        WireType::I32 => Value::I32(0),
        WireType::U32 => Value::U32(0),
        WireType::I64 => Value::I64(0),
        WireType::U64 => Value::U64(0),
        WireType::F32 => Value::F32(0.0),
        WireType::F64 => Value::F64(0.0),
        WireType::Enum(_) => Value::Enum(0),
        WireType::String => Value::String(String::new()),
        WireType::DateTime => Value::DateTime(DateTime::<Utc>::default()),
        WireType::Nullable(inner) | WireType::Alias(_, inner) => default_for(inner),
        WireType::Array(_) | WireType::List(_) | WireType::Set(_) => Value::List(Vec::new()),
        WireType::Map(..) => Value::Map(Vec::new()),
        WireType::Variant(alternatives) => Value::Variant(Variant::empty(alternatives.clone())),
        WireType::Point3D => Value::Point3D(Point3D::default()),
        WireType::Point4D => Value::Point4D(Point4D::default()),
        WireType::Matrix3D => Value::Matrix3D(Box::new(Matrix3D::identity())),
        WireType::Message(_) => Value::Null,
    }
}

/// Conversion out of a [`Value`], failing on a shape mismatch
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

pub(crate) fn mismatch(expected: &'static str, found: &Value) -> Error {
    Error::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident, $name:literal;)*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(inner) => Ok(inner),
                        other => Err(mismatch($name, &other)),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    bool => Bool, "bool";
    i8 => I8, "i8";
    u8 => U8, "u8";
    i16 => I16, "i16";
    u16 => U16, "u16";
    i32 => I32, "i32";
    u32 => U32, "u32";
    i64 => I64, "i64";
    u64 => U64, "u64";
    f32 => F32, "f32";
    f64 => F64, "f64";
    DateTime<Utc> => DateTime, "datetime";
    Record => Message, "message";
    Variant => Variant, "variant";
    Point3D => Point3D, "point3d";
    Point4D => Point4D, "point4d";
    SharedRef => Shared, "shared";
    WeakRef => Weak, "weak";
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

/// An absent string reads as empty
impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(inner) => Ok(inner),
            Value::Null => Ok(String::new()),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl From<Matrix3D> for Value {
    fn from(value: Matrix3D) -> Self {
        Value::Matrix3D(Box::new(value))
    }
}

impl FromValue for Matrix3D {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Matrix3D(inner) => Ok(*inner),
            other => Err(mismatch("matrix3d", &other)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<K, V, S> From<HashMap<K, V, S>> for Value
where
    K: Into<Value>,
    V: Into<Value>,
{
    fn from(map: HashMap<K, V, S>) -> Self {
        Value::map(map)
    }
}

impl<K, V, S> FromValue for HashMap<K, V, S>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
    S: BuildHasher + Default,
{
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

/// A Rust type that travels as one schema-described message
pub trait Message: Sized {
    /// Message type id written in front of every payload
    const UID: u32;

    fn schema() -> MessageSchema;

    fn to_record(&self) -> Record;

    fn from_record(record: Record) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IntWidth;
    use std::collections::HashSet;

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Value::from(7i32), Value::I32(7));
        assert_eq!(i32::from_value(Value::I32(7)).unwrap(), 7);
        assert!(matches!(
            i32::from_value(Value::String("x".into())),
            Err(Error::TypeMismatch {
                expected: "i32",
                found: "string"
            })
        ));
        assert_eq!(String::from_value(Value::Null).unwrap(), "");
        assert_eq!(Option::<u8>::from_value(Value::Null).unwrap(), None);
        assert_eq!(
            Vec::<u16>::from_value(Value::from(vec![1u16, 2, 3])).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_float_equality_by_bits() {
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
        assert_ne!(Value::F32(0.0), Value::F32(-0.0));
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let a = Value::map([(1u8, "one"), (2u8, "two")]);
        let b = Value::map([(2u8, "two"), (1u8, "one")]);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_cyclic_equality_terminates() {
        let a = SharedRef::new(Value::Null);
        a.set(Value::List(vec![Value::Shared(a.clone())]));
        let b = SharedRef::new(Value::Null);
        b.set(Value::List(vec![Value::Shared(b.clone())]));

        assert_eq!(Value::Shared(a.clone()), Value::Shared(b));
        assert!(format!("{:?}", Value::Shared(a)).starts_with("Shared(SharedRef(0x"));
    }

    #[test]
    fn test_conforms() {
        let list = WireType::list(WireType::I32);
        assert!(Value::from(vec![1i32, 2]).conforms_wire(&list));
        assert!(!Value::from(vec![1i64]).conforms_wire(&list));
        assert!(Value::Enum(200).conforms_wire(&WireType::Enum(IntWidth::U8)));
        assert!(!Value::Enum(300).conforms_wire(&WireType::Enum(IntWidth::U8)));

        assert!(Value::Null.conforms(&WireType::String.raw()));
        assert!(!Value::Null.conforms(&WireType::I32.into()));
        assert!(Value::shared(1i32).conforms(&WireType::I32.shared()));
        assert!(!Value::I32(1).conforms(&WireType::I32.shared()));
    }

    #[test]
    fn test_record_take_and_set() {
        let schema = MessageSchema::builder(3, "Pair")
            .field("left", WireType::I32)
            .field("right", WireType::String)
            .build();
        let mut record = Record::from_schema(&schema);
        assert_eq!(record.fields(), &[Value::I32(0), Value::String(String::new())]);

        record.set(&schema, "right", "r").unwrap();
        assert!(matches!(
            record.set(&schema, "middle", 1i32),
            Err(Error::UnknownField(_))
        ));
        assert_eq!(record.take::<String>(1).unwrap(), "r");
        assert!(record.get(1).unwrap().is_null());
        assert!(matches!(
            record.take::<i32>(5),
            Err(Error::FieldCount { .. })
        ));
    }
}
