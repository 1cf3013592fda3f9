// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hot-path codec benchmarks
//!
//! Everything a frame touches between the wire and a subscriber callback:
//! - L2 port stamping on RX/TX
//! - pub/sub header encode/decode
//! - DFU frame encode/decode and the image CRC

#![allow(clippy::uninlined_format_args)]

use bristlemouth::dfu::{crc16_ccitt, DfuFrame, DfuMessage};
use bristlemouth::l2::frame;
use bristlemouth::pubsub::wire;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn multicast_frame(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len.max(frame::MIN_FRAME_LEN)];
    let dst = frame::ETH_HEADER_LEN + frame::IPV6_DST_ADDR_OFFSET;
    buf[dst..dst + 2].copy_from_slice(&frame::GLOBAL_MULTICAST_PREFIX);
    buf
}

fn bench_port_stamping(c: &mut Criterion) {
    let mut group = c.benchmark_group("l2_stamp");
    let mut buf = multicast_frame(256);

    group.bench_function("ingress", |b| {
        b.iter(|| {
            frame::stamp_ingress_port(black_box(&mut buf), black_box(0b10));
            black_box(frame::ingress_port(&buf))
        })
    });
    group.bench_function("egress_request", |b| {
        b.iter(|| {
            frame::request_egress_port(black_box(&mut buf), black_box(2));
            black_box(frame::take_requested_egress_port(&mut buf))
        })
    });
    group.bench_function("multicast_check", |b| {
        b.iter(|| black_box(frame::is_global_multicast(black_box(&buf))))
    });
    group.finish();
}

fn bench_pubsub_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("pubsub_wire");
    for size in [16usize, 256, 1024] {
        let data = vec![0x5au8; size];
        let encoded = wire::encode("sensors/temperature", &data, 1, 1).expect("encode");
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &data, |b, data| {
            b.iter(|| wire::encode(black_box("sensors/temperature"), black_box(data), 1, 1))
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
            b.iter(|| black_box(wire::decode(black_box(encoded)).map(|m| m.data.len())))
        });
    }
    group.finish();
}

fn bench_dfu(c: &mut Criterion) {
    let mut group = c.benchmark_group("dfu");
    let chunk = vec![0xa5u8; 512];
    let payload = DfuFrame::new(0xaaaa, 0xbbbb, DfuMessage::Payload(chunk.clone())).encode();
    group.throughput(Throughput::Bytes(chunk.len() as u64));

    group.bench_function("payload_encode", |b| {
        b.iter(|| {
            DfuFrame::new(0xaaaa, 0xbbbb, DfuMessage::Payload(black_box(chunk.clone()))).encode()
        })
    });
    group.bench_function("payload_decode", |b| {
        b.iter(|| black_box(DfuFrame::decode(black_box(&payload)).is_ok()))
    });
    group.bench_function("crc16_chunk", |b| {
        b.iter(|| crc16_ccitt(black_box(0), black_box(&chunk)))
    });
    group.finish();
}

criterion_group!(benches, bench_port_stamping, bench_pubsub_wire, bench_dfu);
criterion_main!(benches);
