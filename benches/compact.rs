use blink_protocol::codec::{compact, Strictness};
use blink_protocol::{compile_schema, FieldMap, Message, QName, Registry, Value};
use criterion::{criterion_group, criterion_main, Criterion};

fn gen_schema_and_message(field_count: usize) -> (Registry, Message) {
    let mut src = String::from("Bench/1 ->");
    for i in 0..field_count {
        if i > 0 {
            src.push(',');
        }
        src.push_str(&format!(" u32 F{i}"));
    }
    let schema = compile_schema(&src).unwrap();
    let registry = Registry::from_schema(schema);

    let mut fields = FieldMap::new();
    for i in 0..field_count {
        fields.insert(format!("F{i}"), Value::UInt(i as u64));
    }
    let msg = Message {
        ty: QName::bare("Bench"),
        fields,
        extension: Vec::new(),
        unknown_type: false,
    };
    (registry, msg)
}

fn bench_compact_roundtrip(c: &mut Criterion) {
    for &field_count in &[1usize, 10, 50, 100] {
        let (registry, msg) = gen_schema_and_message(field_count);

        c.bench_function(&format!("encode_{field_count}_fields"), |b| {
            b.iter(|| compact::encode(&msg, &registry).unwrap())
        });

        let bytes = compact::encode(&msg, &registry).unwrap();

        c.bench_function(&format!("decode_{field_count}_fields"), |b| {
            b.iter(|| compact::decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap())
        });
    }
}

criterion_group!(benches, bench_compact_roundtrip);
criterion_main!(benches);
