//! Codec benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use weft_core::{Codec, MessageSchema, Record, SchemaRegistry, SharedRef, Value, WireType};

const SAMPLE: u32 = 0x53414d50;

fn codec() -> Codec {
    let schema = MessageSchema::builder(SAMPLE, "Sample")
        .field("address", WireType::String)
        .field("value", WireType::F64)
        .field("samples", WireType::list(WireType::F32))
        .field("labels", WireType::map(WireType::String, WireType::I32))
        .field("owner", WireType::String.shared())
        .field("alias", WireType::String.shared())
        .build();
    Codec::new(SchemaRegistry::new().with(schema).unwrap()).unwrap()
}

fn sample() -> Record {
    let owner = SharedRef::new("controller-1");
    Record::new(
        SAMPLE,
        vec![
            Value::from("/test/benchmark/value"),
            Value::F64(3.14159),
            Value::from((0..64).map(|i| i as f32 * 0.5).collect::<Vec<_>>()),
            Value::map([("key1", 1i32), ("key2", 2), ("key3", 3)]),
            Value::Shared(owner.clone()),
            Value::Shared(owner),
        ],
    )
}

fn encode_benchmark(c: &mut Criterion) {
    let codec = codec();
    let record = sample();

    c.bench_function("encode_sample_message", |b| {
        b.iter(|| black_box(codec.encode_message(&record).unwrap()))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let codec = codec();
    let encoded = codec.encode_message(&sample()).unwrap();

    c.bench_function("decode_sample_message", |b| {
        b.iter(|| black_box(codec.decode_message(&encoded).unwrap()))
    });
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
