//! Codec tests for Weft core

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use weft_core::{
    Codec, Error, IntWidth, Matrix3D, Message, MessageSchema, Point3D, Point4D, Record,
    SchemaRegistry, SharedRef, Value, Variant, WireType, MAX_NESTING,
};

#[derive(Debug, Clone, PartialEq)]
struct Reading {
    sensor: u32,
    label: String,
    samples: Vec<f32>,
    limits: HashMap<String, i64>,
}

impl Message for Reading {
    const UID: u32 = 0x5245_4144;

    fn schema() -> MessageSchema {
        MessageSchema::builder(Self::UID, "Reading")
            .field("sensor", WireType::U32)
            .field("label", WireType::String)
            .field("samples", WireType::list(WireType::F32))
            .field("limits", WireType::map(WireType::String, WireType::I64))
            .build()
    }

    fn to_record(&self) -> Record {
        Record::new(
            Self::UID,
            vec![
                self.sensor.into(),
                self.label.clone().into(),
                self.samples.clone().into(),
                self.limits.clone().into(),
            ],
        )
    }

    fn from_record(mut record: Record) -> weft_core::Result<Self> {
        Ok(Self {
            sensor: record.take(0)?,
            label: record.take(1)?,
            samples: record.take(2)?,
            limits: record.take(3)?,
        })
    }
}

const NODE: u32 = 0x4e4f_4445;
const CHOICE: u32 = 0x4348_4f49;

fn codec_with(schemas: Vec<MessageSchema>) -> Codec {
    let mut registry = SchemaRegistry::new();
    registry.register_message::<Reading>().unwrap();
    for schema in schemas {
        registry.register(schema).unwrap();
    }
    Codec::new(registry).unwrap()
}

fn single_field(uid: u32, ty: impl Into<weft_core::FieldType>) -> MessageSchema {
    MessageSchema::builder(uid, "Single").field("value", ty).build()
}

#[test]
fn test_typed_message_roundtrip() {
    let codec = codec_with(vec![]);
    let reading = Reading {
        sensor: 17,
        label: "boiler".to_string(),
        samples: vec![1.5, -2.25, 1e6],
        limits: [("low".to_string(), -40), ("high".to_string(), 120)]
            .into_iter()
            .collect(),
    };

    let encoded = codec.encode(&reading).expect("encode failed");
    assert_eq!(&encoded[..4], &Reading::UID.to_le_bytes());

    let decoded: Reading = codec.decode(&encoded).expect("decode failed");
    assert_eq!(decoded, reading);
}

#[test]
fn test_typed_decode_rejects_other_uid() {
    let codec = codec_with(vec![single_field(1, WireType::U8)]);
    let bytes = codec
        .encode_message(&Record::new(1, vec![Value::U8(3)]))
        .unwrap();
    assert_eq!(
        codec.decode::<Reading>(&bytes),
        Err(Error::MessageMismatch {
            expected: Reading::UID,
            found: 1
        })
    );
}

#[test]
fn test_variant_wire_form() {
    let alternatives = WireType::variant([WireType::I32, WireType::String]);
    let codec = codec_with(vec![single_field(CHOICE, alternatives.clone())]);

    let variant = Variant::for_wire(&alternatives)
        .unwrap()
        .with("hello")
        .unwrap();
    let record = Record::new(CHOICE, vec![Value::Variant(variant)]);
    let bytes = codec.encode_message(&record).unwrap();
    assert_eq!(&bytes[4..], &[1, 5, b'h', b'e', b'l', b'l', b'o']);

    let mut decoded = codec.decode_message(&bytes).unwrap();
    let variant: Variant = decoded.take(0).unwrap();
    assert_eq!(variant.which().unwrap(), 1);
    assert_eq!(variant.get::<String>().unwrap(), "hello");
    assert!(variant.get::<i32>().is_err());
}

#[test]
fn test_empty_variant_not_encodable() {
    let alternatives = WireType::variant([WireType::I32, WireType::String]);
    let codec = codec_with(vec![single_field(CHOICE, alternatives.clone())]);
    let record = Record::new(
        CHOICE,
        vec![Value::Variant(Variant::for_wire(&alternatives).unwrap())],
    );
    assert_eq!(codec.encode_message(&record), Err(Error::VariantEmpty));
}

#[test]
fn test_self_cycle_roundtrip() {
    let codec = codec_with(vec![MessageSchema::builder(NODE, "Node")
        .field("next", WireType::Message(NODE).shared())
        .build()]);

    // node.next points back at node
    let cell = SharedRef::new(Value::Null);
    cell.set(Record::new(NODE, vec![Value::Shared(cell.clone())]));
    let root = Record::new(NODE, vec![Value::Shared(cell.clone())]);

    let bytes = codec.encode_message(&root).unwrap();
    assert_eq!(&bytes[4..], &[1, 0, 1, 0]);

    let decoded = codec.decode_message(&bytes).unwrap();
    let outer = decoded.fields()[0].as_shared().unwrap().clone();
    let inner = outer.read().as_record().unwrap().fields()[0]
        .as_shared()
        .unwrap()
        .clone();
    assert!(outer.ptr_eq(&inner));

    // break the cycles so the cells are freed
    cell.set(Value::Null);
    outer.set(Value::Null);
}

#[test]
fn test_group_two_node_cycle() {
    let codec = codec_with(vec![MessageSchema::builder(NODE, "Node")
        .field("next", WireType::Message(NODE).group())
        .build()]);

    // a.next = b, b.next = a
    let a = SharedRef::new(Value::Null);
    let b = SharedRef::new(Value::Null);
    a.set(Record::new(NODE, vec![Value::Shared(b.clone())]));
    b.set(Record::new(NODE, vec![Value::Shared(a.clone())]));
    let root = Record::new(NODE, vec![Value::Shared(a.clone())]);

    let bytes = codec.encode_message(&root).unwrap();
    assert_eq!(&bytes[4..], &[1, 0, 2, 0, 1, 0]);

    let decoded = codec.decode_message(&bytes).unwrap();
    let first = decoded.fields()[0].as_shared().unwrap().clone();
    let second = first.read().as_record().unwrap().fields()[0]
        .as_shared()
        .unwrap()
        .clone();
    let back = second.read().as_record().unwrap().fields()[0]
        .as_shared()
        .unwrap()
        .clone();
    assert!(!first.ptr_eq(&second));
    assert!(back.ptr_eq(&first));

    a.set(Value::Null);
    b.set(Value::Null);
    first.set(Value::Null);
    second.set(Value::Null);
}

#[test]
fn test_group_repeated_and_absent_keys() {
    let codec = codec_with(vec![MessageSchema::builder(14, "Refs")
        .field("left", WireType::U32.group())
        .field("right", WireType::U32.group())
        .field("none", WireType::U32.group())
        .build()]);
    let cell = SharedRef::new(7u32);
    let record = Record::new(
        14,
        vec![Value::Shared(cell.clone()), Value::Shared(cell), Value::Null],
    );

    let bytes = codec.encode_message(&record).unwrap();
    assert_eq!(&bytes[4..], &[1, 0, 7, 0, 0, 0, 1, 0, 0, 0]);

    let decoded = codec.decode_message(&bytes).unwrap();
    let left = decoded.fields()[0].as_shared().unwrap();
    let right = decoded.fields()[1].as_shared().unwrap();
    assert!(left.ptr_eq(right));
    assert_eq!(*left.read(), Value::U32(7));
    assert_eq!(decoded.fields()[2], Value::Null);
}

#[test]
fn test_flagged_kinds_present() {
    let codec = codec_with(vec![MessageSchema::builder(15, "Flagged")
        .field("raw", WireType::I32.raw())
        .field("unique", WireType::I32.unique())
        .build()]);
    let record = Record::new(15, vec![Value::I32(-1), Value::I32(5)]);
    let bytes = codec.encode_message(&record).unwrap();
    assert_eq!(&bytes[4..], &[1, 0xFF, 0xFF, 0xFF, 0xFF, 1, 5, 0, 0, 0]);
    assert_eq!(codec.decode_message(&bytes).unwrap(), record);
}

#[test]
fn test_wrapper_and_fixed_wire_types() {
    let codec = codec_with(vec![MessageSchema::builder(16, "Mixed")
        .field("note", WireType::nullable(WireType::String))
        .field("celsius", WireType::alias("Celsius", WireType::F64))
        .field("glyph", WireType::Char)
        .field("ports", WireType::array(WireType::U16))
        .field("colour", WireType::Point4D)
        .build()]);
    let record = Record::new(
        16,
        vec![
            Value::from("hi"),
            Value::F64(21.5),
            Value::Char(0x263A),
            Value::List(vec![Value::U16(1), Value::U16(0x0700)]),
            Value::Point4D(Point4D::new(1.0, 0.5, -2.0, 0.25)),
        ],
    );

    let bytes = codec.encode_message(&record).unwrap();
    let body = &bytes[4..];
    assert_eq!(&body[..3], &[2, b'h', b'i']);
    assert_eq!(&body[3..11], &21.5f64.to_le_bytes());
    assert_eq!(&body[11..13], &[0x3A, 0x26]);
    assert_eq!(&body[13..18], &[2, 1, 0, 0x00, 0x07]);
    assert_eq!(body.len(), 18 + 4 * 4);

    assert_eq!(codec.decode_message(&bytes).unwrap(), record);
}

#[test]
fn test_weak_resolves_to_shared_in_same_message() {
    let codec = codec_with(vec![MessageSchema::builder(2, "Pair")
        .field("owner", WireType::String.shared())
        .field("observer", WireType::String.weak())
        .build()]);

    let cell = SharedRef::new("state");
    let record = Record::new(
        2,
        vec![Value::Shared(cell.clone()), Value::Weak(cell.downgrade())],
    );
    let bytes = codec.encode_message(&record).unwrap();
    assert_eq!(&bytes[4..], &[1, 0, 5, b's', b't', b'a', b't', b'e', 1, 0]);

    let decoded = codec.decode_message(&bytes).unwrap();
    let owner = decoded.fields()[0].as_shared().unwrap();
    let Value::Weak(observer) = &decoded.fields()[1] else {
        panic!("expected weak reference");
    };
    assert!(observer.upgrade().unwrap().ptr_eq(owner));
}

#[test]
fn test_absent_references() {
    let codec = codec_with(vec![MessageSchema::builder(3, "Refs")
        .field("shared", WireType::I32.shared())
        .field("unique", WireType::I32.unique())
        .build()]);
    let record = Record::new(3, vec![Value::Null, Value::Null]);
    let bytes = codec.encode_message(&record).unwrap();
    assert_eq!(&bytes[4..], &[0, 0, 0]);
    assert_eq!(codec.decode_message(&bytes).unwrap(), record);
}

#[test]
fn test_long_string_length_prefix() {
    let codec = codec_with(vec![single_field(4, WireType::String)]);
    let text = "a".repeat(300);
    let bytes = codec
        .encode_message(&Record::new(4, vec![Value::from(text.as_str())]))
        .unwrap();
    assert_eq!(&bytes[4..6], &[0xAC, 0x02]);
    assert_eq!(bytes.len(), 4 + 2 + 300);
}

#[test]
fn test_absent_string_reads_empty() {
    let codec = codec_with(vec![single_field(4, WireType::String)]);
    let bytes = codec
        .encode_message(&Record::new(4, vec![Value::Null]))
        .unwrap();
    let mut decoded = codec.decode_message(&bytes).unwrap();
    assert_eq!(decoded.take::<String>(0).unwrap(), "");
}

#[test]
fn test_set_decode_deduplicates() {
    let codec = codec_with(vec![single_field(5, WireType::set(WireType::U8))]);
    let bytes = [5, 0, 0, 0, 4, 7, 9, 7, 1];
    let decoded = codec.decode_message(&bytes).unwrap();
    assert_eq!(decoded.fields()[0], Value::from(vec![7u8, 9, 1]));
}

#[test]
fn test_map_decode_last_write_wins() {
    let codec = codec_with(vec![single_field(6, WireType::map(WireType::U8, WireType::U8))]);
    let bytes = [6, 0, 0, 0, 3, 1, 10, 2, 20, 1, 30];
    let decoded = codec.decode_message(&bytes).unwrap();
    assert_eq!(
        decoded.fields()[0],
        Value::map([(1u8, 30u8), (2u8, 20u8)])
    );
}

#[test]
fn test_datetime_ticks() {
    let codec = codec_with(vec![single_field(7, WireType::DateTime)]);
    let instant = Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap();
    let bytes = codec
        .encode_message(&Record::new(7, vec![Value::DateTime(instant)]))
        .unwrap();

    let ticks = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
    assert_eq!(ticks, instant.timestamp() as u64 * 10_000_000);
    assert_eq!(
        codec.decode_message(&bytes).unwrap().fields()[0],
        Value::DateTime(instant)
    );
}

#[test]
fn test_geometry_narrowed_to_f32() {
    let codec = codec_with(vec![MessageSchema::builder(8, "Pose")
        .field("position", WireType::Point3D)
        .field("transform", WireType::Matrix3D)
        .build()]);
    let position = Point3D::new(0.1, 2.0, -3.5);
    let transform = Matrix3D::translation(0.3, 0.0, 1.0);
    let record = Record::new(8, vec![position.into(), transform.into()]);

    let bytes = codec.encode_message(&record).unwrap();
    assert_eq!(bytes.len(), 4 + 3 * 4 + 16 * 4);

    let mut decoded = codec.decode_message(&bytes).unwrap();
    assert_eq!(decoded.take::<Point3D>(0).unwrap(), position.narrowed());
    let matrix = decoded.take::<Matrix3D>(1).unwrap();
    assert_eq!(matrix, transform.narrowed());
    assert_eq!(matrix.offset().z, 1.0);
}

#[test]
fn test_enum_widths() {
    let codec = codec_with(vec![MessageSchema::builder(9, "Modes")
        .field("small", WireType::Enum(IntWidth::I8))
        .field("large", WireType::Enum(IntWidth::U32))
        .build()]);
    let record = Record::new(9, vec![Value::Enum(-2), Value::Enum(0xDEAD_BEEF)]);
    let bytes = codec.encode_message(&record).unwrap();
    assert_eq!(&bytes[4..], &[0xFE, 0xEF, 0xBE, 0xAD, 0xDE]);
    assert_eq!(codec.decode_message(&bytes).unwrap(), record);
}

#[test]
fn test_each_message_gets_fresh_group() {
    let codec = codec_with(vec![single_field(10, WireType::U16.shared())]);
    let record = Record::new(10, vec![Value::shared(7u16)]);
    let first = codec.encode_message(&record).unwrap();
    let second = codec.encode_message(&record).unwrap();
    assert_eq!(first, second);
    assert_eq!(&first[4..], &[1, 0, 7, 0]);
}

// ============================================================================
// MALFORMED INPUT
// ============================================================================

#[test]
fn test_truncated_message() {
    let codec = codec_with(vec![]);
    let reading = Reading {
        sensor: 1,
        label: "x".to_string(),
        samples: vec![],
        limits: HashMap::new(),
    };
    let bytes = codec.encode(&reading).unwrap();
    let err = codec
        .decode::<Reading>(&bytes[..bytes.len() - 1])
        .unwrap_err();
    assert!(err.is_malformed(), "{err}");
    assert!(codec.decode_message(&[1, 2]).unwrap_err().is_malformed());
}

#[test]
fn test_bulk_length_checked_up_front() {
    let codec = codec_with(vec![single_field(11, WireType::list(WireType::U32))]);
    let bytes = [11, 0, 0, 0, 0xE8, 0x07, 1, 2, 3, 4, 5, 6, 7, 8];
    assert_eq!(
        codec.decode_message(&bytes),
        Err(Error::EndOfStream {
            needed: 4000,
            have: 8
        })
    );
}

#[test]
fn test_unterminated_length() {
    let codec = codec_with(vec![single_field(12, WireType::String)]);
    let bytes = [12, 0, 0, 0, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
    assert_eq!(codec.decode_message(&bytes), Err(Error::UnterminatedLength));
}

#[test]
fn test_bad_discriminant() {
    let codec = codec_with(vec![single_field(
        CHOICE,
        WireType::variant([WireType::I32, WireType::String]),
    )]);
    let bytes = [0x49, 0x4f, 0x48, 0x43, 2, 0, 0, 0, 0];
    assert_eq!(
        codec.decode_message(&bytes),
        Err(Error::InvalidDiscriminant { index: 2, count: 2 })
    );
}

#[test]
fn test_invalid_utf8() {
    let codec = codec_with(vec![single_field(13, WireType::String)]);
    let bytes = [13, 0, 0, 0, 2, 0xC3, 0x28];
    assert_eq!(codec.decode_message(&bytes), Err(Error::InvalidUtf8));
}

#[test]
fn test_nesting_depth_limited() {
    const CHAIN: u32 = 0x4348_4149;
    let codec = codec_with(vec![MessageSchema::builder(CHAIN, "Chain")
        .field("next", WireType::Message(CHAIN).raw())
        .build()]);

    // every byte says "another link follows"
    let mut bytes = CHAIN.to_le_bytes().to_vec();
    bytes.extend(std::iter::repeat(1u8).take(1 << 20));
    bytes.push(0);
    let err = codec.decode_message(&bytes).unwrap_err();
    assert_eq!(err, Error::NestingTooDeep(MAX_NESTING));
    assert!(err.is_malformed());

    // a chain within the limit still round-trips
    let mut record = Record::new(CHAIN, vec![Value::Null]);
    for _ in 0..MAX_NESTING - 1 {
        record = Record::new(CHAIN, vec![Value::Message(record)]);
    }
    let bytes = codec.encode_message(&record).unwrap();
    assert_eq!(codec.decode_message(&bytes).unwrap(), record);

    let too_deep = Record::new(CHAIN, vec![Value::Message(record)]);
    assert_eq!(
        codec.encode_message(&too_deep),
        Err(Error::NestingTooDeep(MAX_NESTING))
    );
}
