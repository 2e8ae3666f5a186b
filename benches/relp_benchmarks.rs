// ABOUTME: Benchmark suite for RELP codec performance
// ABOUTME: Measures frame parsing across payload sizes, sendbuf building and txnr rewriting

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use relp::command::Command;
use relp::frame::FrameParser;
use relp::offers::Offers;
use relp::sendbuf::{RspAction, SendBuf};
use std::time::Duration;

fn sample_frame(payload_len: usize) -> Vec<u8> {
    let payload = vec![b'x'; payload_len];
    SendBuf::build(123_456, Command::Syslog, &payload, RspAction::None)
        .unwrap()
        .wire()
        .to_vec()
}

fn bench_frame_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");
    group.measurement_time(Duration::from_secs(10));

    for payload_len in [0usize, 64, 1024, 32 * 1024] {
        let wire = sample_frame(payload_len);
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_len),
            &wire,
            |b, wire| {
                b.iter(|| {
                    let mut parser = FrameParser::new(128 * 1024);
                    let mut out = Vec::new();
                    parser.consume(black_box(wire.as_slice()), &mut out).unwrap();
                    out
                })
            },
        );
    }
    group.finish();
}

fn bench_frame_parse_split(c: &mut Criterion) {
    // frames arriving split across reads exercise the state machine restart
    let wire = sample_frame(1024);
    let mid = wire.len() / 2;

    let mut group = c.benchmark_group("frame_parse_split");
    group.bench_function("two_chunks", |b| {
        b.iter(|| {
            let mut parser = FrameParser::new(128 * 1024);
            let mut out = Vec::new();
            parser.consume(black_box(&wire[..mid]), &mut out).unwrap();
            parser.consume(black_box(&wire[mid..]), &mut out).unwrap();
            out
        })
    });
    group.finish();
}

fn bench_sendbuf_build(c: &mut Criterion) {
    let payload = vec![b'x'; 1024];

    let mut group = c.benchmark_group("sendbuf");
    group.bench_function("build_1k", |b| {
        b.iter(|| {
            SendBuf::build(
                black_box(987_654_321),
                Command::Syslog,
                black_box(&payload),
                RspAction::None,
            )
            .unwrap()
        })
    });

    group.bench_function("rewrite_txnr", |b| {
        let mut sendbuf = SendBuf::build(1, Command::Syslog, &payload, RspAction::None).unwrap();
        let mut txnr = 1u32;
        b.iter(|| {
            txnr = relp::next_txnr(txnr);
            sendbuf.rewrite_txnr(black_box(txnr)).unwrap();
        })
    });
    group.finish();
}

fn bench_offers(c: &mut Criterion) {
    let wire = b"relp_version=0\ncommands=syslog\nrelp_software=librelp,1.2.14,librelp";

    let mut group = c.benchmark_group("offers");
    group.bench_function("parse", |b| {
        b.iter(|| Offers::parse(black_box(wire)).unwrap())
    });
    group.bench_function("serialize", |b| {
        let offers = Offers::parse(wire).unwrap();
        b.iter(|| black_box(&offers).serialize())
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_frame_parse,
    bench_frame_parse_split,
    bench_sendbuf_build,
    bench_offers
);
criterion_main!(benches);
