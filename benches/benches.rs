use byte_slice_cast::AsByteSlice;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use iq_slurper::{
    complex::{interleave, Sample},
    BlockEncoder, Codec, Compression,
};
use rand::prelude::*;

const CHUNK: usize = 64 * 1024;

fn noisy_chunk() -> Vec<Sample> {
    let mut rng = rand::thread_rng();
    (0..CHUNK)
        .map(|_| Sample::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect()
}

fn benchmark(c: &mut Criterion) {
    let samples = noisy_chunk();
    let mut words = Vec::new();

    let mut group = c.benchmark_group("serialize");
    group.throughput(Throughput::Bytes((CHUNK * 8) as u64));
    group.bench_function("interleave", |b| {
        b.iter(|| interleave(black_box(&samples), black_box(&mut words)))
    });
    group.finish();

    interleave(&samples, &mut words);
    let raw = words.as_byte_slice();
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(raw.len() as u64));
    for (compression, level) in [
        (Compression::None, 0),
        (Compression::Gzip, 1),
        (Compression::Gzip, 6),
        (Compression::Lzma, 1),
        (Compression::Zstd, 3),
    ] {
        let codec = Codec::new(compression, level);
        group.bench_with_input(
            BenchmarkId::new(compression.name(), level),
            &raw,
            |b, raw| b.iter(|| codec.encode(0, black_box(raw))),
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
