#![allow(clippy::all)]
//! Benchmarks for the rule engine.
//!
//! Tests: buffered phase execution over benign and matching arguments,
//! rule set scaling, chained rules, header and body streaming, and
//! context finalization.

mod common;
use common::generators;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use r0n_rule_engine::modules::rule_engine::{HostState, Phase};
use std::hint::black_box;

// ---------------------------------------------------------------------------
// Buffered phase benchmarks
// ---------------------------------------------------------------------------

fn bench_request_phase(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_engine/request_phase");
    let (engine, loc) = generators::rule_engine(12, 0);

    for (label, payloads) in [
        ("benign", generators::benign_payloads()),
        ("malicious", generators::attack_payloads()),
    ] {
        group.bench_with_input(BenchmarkId::new(label, payloads.len()), &payloads, |b, payloads| {
            b.iter(|| {
                let mut tx = generators::transaction(&engine, loc, payloads);
                let _ = black_box(engine.run_phase(&mut tx, Phase::Request));
                black_box(tx.is_blocked())
            });
        });
    }

    group.finish();
}

fn bench_ruleset_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_engine/ruleset_scaling");
    let payloads = generators::benign_payloads();

    for count in [1, 10, 50, 200] {
        let (engine, loc) = generators::rule_engine(count, 0);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let mut tx = generators::transaction(&engine, loc, &payloads);
                let _ = black_box(engine.notify_state(&mut tx, HostState::Request));
            });
        });
    }

    group.finish();
}

fn bench_chained_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_engine/chains");
    let payloads = generators::attack_payloads();

    for chain_every in [0, 2, 4] {
        let (engine, loc) = generators::rule_engine(24, chain_every);
        group.bench_with_input(
            BenchmarkId::new("chain_every", chain_every),
            &chain_every,
            |b, _| {
                b.iter(|| {
                    let mut tx = generators::transaction(&engine, loc, &payloads);
                    let _ = black_box(engine.run_phase(&mut tx, Phase::Request));
                });
            },
        );
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Streaming benchmarks
// ---------------------------------------------------------------------------

fn bench_stream_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_engine/stream_headers");
    let (engine, loc) = generators::rule_engine(4, 0);

    for count in [4, 16, 64] {
        let headers = generators::request_headers(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &headers, |b, headers| {
            b.iter(|| {
                let mut tx = generators::transaction(&engine, loc, &[]);
                let _ = black_box(engine.notify_headers(
                    &mut tx,
                    HostState::ResponseHeaderData,
                    headers,
                ));
            });
        });
    }

    group.finish();
}

fn bench_stream_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_engine/stream_body");
    let (engine, loc) = generators::rule_engine(4, 0);

    for size in [256, 4096, 65536] {
        let chunks = generators::body_chunks(8, size);
        group.throughput(Throughput::Bytes((size * chunks.len()) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &chunks, |b, chunks| {
            b.iter(|| {
                let mut tx = generators::transaction(&engine, loc, &[]);
                for chunk in chunks {
                    let _ = black_box(engine.notify_data(
                        &mut tx,
                        HostState::RequestBodyData,
                        chunk,
                    ));
                }
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Configuration benchmarks
// ---------------------------------------------------------------------------

fn bench_close_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_engine/close_context");

    for count in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(generators::rule_engine(count, 5)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_request_phase,
    bench_ruleset_scaling,
    bench_chained_rules,
    bench_stream_headers,
    bench_stream_body,
    bench_close_context,
);
criterion_main!(benches);
