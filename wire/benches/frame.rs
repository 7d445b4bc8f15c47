use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wire::{EncryptionContext, FrameEncoder};

fn benchmark(c: &mut Criterion) {
    let encoder = FrameEncoder::new();
    let mut cipher = EncryptionContext::new([1, 2, 3, 4], 62);
    let body = vec![0xABu8; 512];

    c.bench_function("encode_512b_frame", |b| {
        b.iter(|| encoder.encode(black_box(&mut cipher), black_box(&body)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
