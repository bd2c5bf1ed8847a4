use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cluevault::challenge::Challenge;
use cluevault::codec::{MasterKey, PayloadCodec, PlaceholderCodec, SealedCodec};

fn benchmark_codecs(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let placeholder = PlaceholderCodec;
    let sealed = SealedCodec::new(&MasterKey::from_bytes([3u8; 32]), "bench").unwrap();

    let placeholder_payload = placeholder.encode(42.5).unwrap();
    let sealed_payload = sealed.encode(42.5).unwrap();

    group.bench_function("placeholder_encode", |b| {
        b.iter(|| placeholder.encode(black_box(42.5)).unwrap())
    });
    group.bench_function("placeholder_decode", |b| {
        b.iter(|| placeholder.decode(black_box(&placeholder_payload)).unwrap())
    });
    group.bench_function("sealed_encode", |b| {
        b.iter(|| sealed.encode(black_box(42.5)).unwrap())
    });
    group.bench_function("sealed_decode", |b| {
        b.iter(|| sealed.decode(black_box(&sealed_payload)).unwrap())
    });
    group.finish();
}

fn benchmark_challenge(c: &mut Criterion) {
    // Session keys are 2000 hex digits, so message building is not free.
    let challenge = Challenge::new(
        format!("0x{}", "ab".repeat(1000)),
        "0xC1ue000000000000000000000000000000000001",
        11155111,
        1_720_000_000,
        30,
    );
    c.bench_function("challenge_message", |b| {
        b.iter(|| black_box(&challenge).message())
    });
}

criterion_group!(benches, benchmark_codecs, benchmark_challenge);
criterion_main!(benches);
