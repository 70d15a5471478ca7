use std::sync::Arc;

use criterion::{
    BenchmarkGroup, Criterion, Throughput, black_box, criterion_group, criterion_main,
    measurement::Measurement,
};
use ddf::encoding::{ByteCounter, write_tag, write_varint};
use ddf::wire::WireType;
use ddf::{FieldSpec, FieldType, MessageDescriptor};

fn descriptor() -> anyhow::Result<Arc<MessageDescriptor>> {
    let nested = MessageDescriptor::builder("NestedMessage")
        .field(FieldSpec::optional("x", 1, FieldType::Int32))
        .field(FieldSpec::repeated("values", 2, FieldType::Sint32))
        .build()?;
    let child = MessageDescriptor::builder("Child")
        .field(FieldSpec::optional("x", 1, FieldType::Uint32))
        .field(FieldSpec::optional("y", 2, FieldType::Uint64))
        .build()?;
    Ok(MessageDescriptor::builder("Test")
        .field(FieldSpec::optional("x", 1, FieldType::Uint32))
        .field(FieldSpec::optional("y", 2, FieldType::Uint64))
        .field(FieldSpec::optional("z", 3, FieldType::Bytes))
        .field(FieldSpec::optional("child1", 4, FieldType::Message).with_message(child))
        .field(FieldSpec::repeated("nested_message", 6, FieldType::Message).with_message(nested))
        .build()?)
}

fn varint(out: &mut Vec<u8>, field: u32, value: u64) -> anyhow::Result<()> {
    write_tag(out, field, WireType::Varint)?;
    write_varint(out, value)?;
    Ok(())
}

fn blob(out: &mut Vec<u8>, field: u32, value: &[u8]) -> anyhow::Result<()> {
    write_tag(out, field, WireType::LengthDelimited)?;
    write_varint(out, value.len() as u64)?;
    out.extend_from_slice(value);
    Ok(())
}

fn make_small() -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    varint(&mut out, 1, 42)?;
    varint(&mut out, 2, 0xDEADBEEF)?;
    Ok(out)
}

fn make_medium() -> anyhow::Result<Vec<u8>> {
    let mut out = make_small()?;
    blob(
        &mut out,
        3,
        b"Hello World! This is a test string with some content.",
    )?;
    let mut child = Vec::new();
    varint(&mut child, 1, 123)?;
    varint(&mut child, 2, 456)?;
    blob(&mut out, 4, &child)?;
    Ok(out)
}

fn make_large() -> anyhow::Result<Vec<u8>> {
    let mut out = make_small()?;
    blob(&mut out, 3, b"Hello World!")?;
    for i in 0..100u64 {
        let mut nested = Vec::new();
        varint(&mut nested, 1, i)?;
        for j in 0..(i % 8) {
            varint(&mut nested, 2, j)?;
        }
        blob(&mut out, 6, &nested)?;
    }
    Ok(out)
}

fn inputs() -> anyhow::Result<[(&'static str, Vec<u8>); 3]> {
    Ok([
        ("small", make_small()?),
        ("medium", make_medium()?),
        ("large", make_large()?),
    ])
}

fn bench_decoding(
    group: &mut BenchmarkGroup<'_, impl Measurement>,
    bench_function_name: &str,
    descriptor: &Arc<MessageDescriptor>,
    data: &[u8],
) {
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function(format!("{bench_function_name}/ddf"), |b| {
        b.iter(|| {
            let record = ddf::decode(black_box(data), descriptor);
            black_box(record.map(|record| record.size()).ok())
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let descriptor = descriptor().expect("valid descriptor");
    let inputs = inputs().expect("inputs should encode");
    let mut group = c.benchmark_group("decode");
    for (name, data) in &inputs {
        bench_decoding(&mut group, name, &descriptor, data);
    }
    group.finish();
}

fn bench_encoding(
    group: &mut BenchmarkGroup<'_, impl Measurement>,
    bench_function_name: &str,
    record: &ddf::OwnedRecord,
) {
    let view = record.view();

    group.bench_function(format!("{bench_function_name}/ddf"), |b| {
        let mut buf = Vec::with_capacity(4096);
        b.iter(|| {
            buf.clear();
            ddf::encode(&view, black_box(&mut buf)).ok();
            black_box(buf.len())
        })
    });

    group.bench_function(format!("{bench_function_name}/count"), |b| {
        b.iter(|| {
            let mut counter = ByteCounter::new();
            ddf::encode(&view, black_box(&mut counter)).ok();
            black_box(counter.count())
        })
    });
}

fn bench_encode(c: &mut Criterion) {
    let descriptor = descriptor().expect("valid descriptor");
    let inputs = inputs().expect("inputs should encode");
    let mut group = c.benchmark_group("encode");
    for (name, data) in &inputs {
        let record = ddf::decode(data, &descriptor).expect("input should decode");
        bench_encoding(&mut group, name, &record);
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
