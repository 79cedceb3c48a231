//! Channel Fragment Reassembly Benchmarks
//!
//! Measures `Assembler::feed` throughput across fragment counts and
//! message sizes, the path every inbound virtual-channel byte runs
//! through before it reaches a protocol engine.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rdp_vchan_runtime::channel::Assembler;
use rdp_vchan_runtime::transport::ChannelFlags;

fn fragment_flags(first: bool, last: bool) -> ChannelFlags {
    ChannelFlags { first, last, ..Default::default() }
}

fn bench_single_fragment(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembler_single_fragment");

    for size in [64usize, 4096, 65536, 1024 * 1024] {
        let data = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("whole_message", size), &data, |b, data| {
            b.iter(|| {
                let mut asm = Assembler::new();
                black_box(asm.feed(black_box(data), data.len(), ChannelFlags::whole()).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_fragmented_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembler_fragmented_message");

    for fragment_count in [4usize, 64, 1024] {
        let chunk_len = 1600; // typical RDP virtual-channel chunk size
        let total_len = chunk_len * fragment_count;
        let chunk = vec![0xCDu8; chunk_len];

        group.throughput(Throughput::Bytes(total_len as u64));
        group.bench_with_input(BenchmarkId::new("fragments", fragment_count), &fragment_count, |b, &count| {
            b.iter(|| {
                let mut asm = Assembler::new();
                for i in 0..count {
                    let flags = fragment_flags(i == 0, i == count - 1);
                    black_box(asm.feed(black_box(&chunk), total_len, flags).unwrap());
                }
            })
        });
    }

    group.finish();
}

fn bench_feed_then_error_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembler_error_recovery");

    group.bench_function("overrun_then_fresh_start", |b| {
        let good = Bytes::from_static(b"0123456789");
        b.iter(|| {
            let mut asm = Assembler::new();
            let _ = asm.feed(b"hel", 5, fragment_flags(true, false));
            let _ = black_box(asm.feed(b"toolongtoolong", 5, fragment_flags(false, true)));
            black_box(asm.feed(&good, good.len(), ChannelFlags::whole()).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_single_fragment, bench_fragmented_message, bench_feed_then_error_recovery);
criterion_main!(benches);
