use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wire::EncryptionContext;

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cipher");
    for size in [64usize, 1024, 16384] {
        group.bench_with_input(format!("encrypt_{size}"), &size, |b, &size| {
            let mut ctx = EncryptionContext::new([1, 2, 3, 4], 62);
            let mut buf = vec![0u8; size];
            b.iter(|| ctx.encrypt(black_box(&mut buf)));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
