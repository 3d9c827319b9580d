use lz4_frame::raw::{compress, decompress};
use lz4_frame::{compress_frame, decompress_frame, frame_bound, CompressionSettings};
use rand::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn criterion_benchmark(c: &mut Criterion) {
    let mut data = vec![0u8; 10_000_000];
    thread_rng().fill(&mut data[2_000_000..6_000_000]); // mixed
    for (i, b) in data[6_000_000..].iter_mut().enumerate() {
        *b = (i % 251) as u8 ^ (i / 4096) as u8;
    }

    let uncompressed_data: &[u8] = data.as_slice();
    let compressed_data = compress(uncompressed_data).unwrap();

    let mut group = c.benchmark_group("raw");
    group.sample_size(10);
    group.bench_with_input("compress", &uncompressed_data, |b, d| b.iter(|| compress(d)));
    group.bench_with_input("decompress", &compressed_data.as_slice(), |b, c| b.iter(|| decompress(c)));
    group.finish();

    let mut group = c.benchmark_group("framed");
    group.sample_size(10);
    for &independent in &[true, false] {
        let mut settings = CompressionSettings::default();
        settings.independent_blocks(independent);

        let mut frame = vec![0u8; frame_bound(data.len(), &settings)];
        let len = compress_frame(&data, &mut frame, &settings).unwrap();
        frame.truncate(len);

        let name = if independent { "independent" } else { "linked" };
        group.bench_function(format!("compress {}", name), |b| {
            let mut out = vec![0u8; frame_bound(data.len(), &settings)];
            b.iter(|| compress_frame(black_box(&data), &mut out, &settings))
        });
        group.bench_function(format!("decompress {}", name), |b| b.iter(|| decompress_frame(black_box(&frame[..]))));
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
