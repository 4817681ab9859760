// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use gr_core::certifier::Certifier;
use gr_core::context::Context;
use gr_core::gtid::GtidSet;
use gr_core::view::MemberId;

fn write_set(size: usize) -> Vec<Vec<u8>> {
    (0..size).map(|i| format!("row-{i}").into_bytes()).collect()
}

fn certify_no_conflict(c: &mut Criterion) {
    let mut group = c.benchmark_group("certify_no_conflict");
    for write_set_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(1));
        group.bench_function(format!("write_set_size={write_set_size}"), |b| {
            let originator = MemberId::from("bench-member");
            let empty = GtidSet::new();
            b.iter_batched(
                || Certifier::new(Context::new_for_test()),
                |certifier| {
                    certifier
                        .certify(
                            &empty,
                            &write_set(write_set_size),
                            true,
                            None,
                            &originator,
                            true,
                        )
                        .unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn certify_growing_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("certify_growing_history");
    group.throughput(Throughput::Elements(1));
    group.bench_function("1000_prior_transactions", |b| {
        let originator = MemberId::from("bench-member");
        b.iter_batched(
            || {
                let certifier = Certifier::new(Context::new_for_test());
                let mut snapshot = GtidSet::new();
                for i in 0..1000 {
                    let result = certifier
                        .certify(
                            &snapshot,
                            &[format!("warmup-{i}").into_bytes()],
                            true,
                            None,
                            &originator,
                            true,
                        )
                        .unwrap();
                    snapshot = result.snapshot_version;
                }
                (certifier, snapshot)
            },
            |(certifier, snapshot)| {
                certifier
                    .certify(
                        &snapshot,
                        &[b"hot-row".to_vec()],
                        true,
                        None,
                        &originator,
                        true,
                    )
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn stable_set_gc(c: &mut Criterion) {
    let mut group = c.benchmark_group("stable_set_gc");
    group.bench_function("10000_entries_half_collected", |b| {
        let originator = MemberId::from("bench-member");
        b.iter_batched(
            || {
                let certifier = Arc::new(Certifier::new(Context::new_for_test()));
                let mut snapshot = GtidSet::new();
                for i in 0..10_000 {
                    let result = certifier
                        .certify(
                            &snapshot,
                            &[format!("row-{i}").into_bytes()],
                            true,
                            None,
                            &originator,
                            true,
                        )
                        .unwrap();
                    snapshot = result.snapshot_version;
                }
                (certifier, snapshot)
            },
            |(certifier, snapshot)| certifier.set_group_stable_transactions_set(&snapshot),
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, certify_no_conflict, certify_growing_history, stable_set_gc);
criterion_main!(benches);
