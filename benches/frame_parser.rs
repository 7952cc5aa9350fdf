//! Benchmarks for the receive path
//!
//! - Frame extraction from a noisy byte stream, in gateway-sized chunks
//! - Full decode of extracted frames into device events
//! - Registry merge of decoded events

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use kocom_wallpad::test_utils::sample_bus_traffic;
use kocom_wallpad::{DeviceStateRegistry, FrameParser, PacketCodec};
use std::hint::black_box;

fn bench_frame_extraction(c: &mut Criterion) {
    let traffic = sample_bus_traffic(500);

    let mut group = c.benchmark_group("frame_extraction");
    group.throughput(Throughput::Bytes(traffic.len() as u64));

    for chunk in [7usize, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut parser = FrameParser::new();
                let mut frames = 0;
                for piece in traffic.chunks(chunk) {
                    frames += parser.feed(black_box(piece)).len();
                }
                black_box(frames)
            })
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frames = FrameParser::new().feed(&sample_bus_traffic(120));

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(frames.len() as u64));

    group.bench_function("packet_codec", |b| {
        b.iter(|| {
            let events: usize = frames
                .iter()
                .filter_map(|f| PacketCodec::decode(black_box(f)))
                .map(|events| events.len())
                .sum();
            black_box(events)
        })
    });

    group.bench_function("decode_and_merge", |b| {
        b.iter(|| {
            let registry = DeviceStateRegistry::new();
            for frame in &frames {
                for event in PacketCodec::decode(frame).unwrap_or_default() {
                    black_box(registry.update(&event));
                }
            }
            black_box(registry.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_frame_extraction, bench_decode);
criterion_main!(benches);
