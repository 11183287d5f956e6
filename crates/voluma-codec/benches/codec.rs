use criterion::{black_box, criterion_group, criterion_main, Criterion};
use voluma_codec::{decode, encode, Codec};

fn brick_payload() -> Vec<u8> {
    // A 64^3 u16 brick with smooth gradients, similar to scanned data.
    let mut data = Vec::with_capacity(64 * 64 * 64 * 2);
    for z in 0u32..64 {
        for y in 0u32..64 {
            for x in 0u32..64 {
                let v = (x * 4 + y * 2 + z) as u16;
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    data
}

fn codec_benchmark(c: &mut Criterion) {
    let raw = brick_payload();
    let encoded = encode(&raw, Codec::Deflate);

    c.bench_function("encode deflate 64^3 u16", |b| {
        b.iter(|| encode(black_box(&raw), Codec::Deflate));
    });
    c.bench_function("decode deflate 64^3 u16", |b| {
        b.iter(|| decode(black_box(&encoded.data), encoded.codec, raw.len()).unwrap());
    });
}

criterion_group!(benches, codec_benchmark);
criterion_main!(benches);
