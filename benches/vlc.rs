use blink_protocol::vlc;
use criterion::{criterion_group, criterion_main, Criterion};

fn gen_values(count: usize) -> Vec<u64> {
    (0..count).map(|i| (i as u64).wrapping_mul(2_654_435_761)).collect()
}

fn bench_vlc_roundtrip(c: &mut Criterion) {
    for &count in &[1usize, 10, 100, 1000] {
        let values = gen_values(count);

        c.bench_function(&format!("encode_u64_{count}_values"), |b| {
            b.iter(|| {
                let mut out = Vec::new();
                for &v in &values {
                    vlc::encode_u64(v, &mut out);
                }
                out
            })
        });

        let mut encoded = Vec::new();
        for &v in &values {
            vlc::encode_u64(v, &mut encoded);
        }

        c.bench_function(&format!("decode_u64_{count}_values"), |b| {
            b.iter(|| {
                let mut pos = 0;
                for _ in 0..values.len() {
                    let _ = vlc::decode_u64(&encoded, &mut pos).unwrap();
                }
            })
        });
    }
}

criterion_group!(benches, bench_vlc_roundtrip);
criterion_main!(benches);
