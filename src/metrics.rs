// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Metrics registered against a `prometheus::Registry`, owned by `Context`
//! and shared (`Arc<Metrics>`) across every component, the way
//! `consensus-core`'s own (unretrieved) `metrics.rs` is wired from
//! `context.rs`/`authority_node.rs`.

use std::sync::Arc;

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry,
};

pub struct Metrics {
    pub node_metrics: NodeMetrics,
}

pub struct NodeMetrics {
    /// Certification outcomes, labeled by result (positive/negative) and
    /// locality (local/remote).
    pub certifications: IntCounterVec,
    pub gc_sweeps_total: IntCounter,
    pub gc_entries_removed_total: IntCounter,
    pub stable_set_rounds_total: IntCounter,
    pub prepare_acks_sent_total: IntCounter,
    pub prepare_acks_received_total: IntCounter,
    pub consistency_wait_seconds: HistogramVec,
    pub hold_gate_wait_outcomes: IntCounterVec,
    pub conflict_detection_enabled: IntGauge,
    pub group_gtid_executed_size: IntGauge,
}

impl NodeMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            certifications: register_int_counter_vec_with_registry!(
                "gr_certifications_total",
                "Certification outcomes by result and locality",
                &["result", "locality"],
                registry,
            )
            .unwrap(),
            gc_sweeps_total: register_int_counter_with_registry!(
                "gr_certifier_gc_sweeps_total",
                "Number of stable-set garbage collection sweeps performed",
                registry,
            )
            .unwrap(),
            gc_entries_removed_total: register_int_counter_with_registry!(
                "gr_certifier_gc_entries_removed_total",
                "Certification info entries removed across all GC sweeps",
                registry,
            )
            .unwrap(),
            stable_set_rounds_total: register_int_counter_with_registry!(
                "gr_stable_set_rounds_total",
                "Completed executed-set broadcast rounds",
                registry,
            )
            .unwrap(),
            prepare_acks_sent_total: register_int_counter_with_registry!(
                "gr_prepare_acks_sent_total",
                "Prepare-ack messages broadcast by this member",
                registry,
            )
            .unwrap(),
            prepare_acks_received_total: register_int_counter_with_registry!(
                "gr_prepare_acks_received_total",
                "Prepare-ack messages received from other members",
                registry,
            )
            .unwrap(),
            consistency_wait_seconds: register_histogram_vec_with_registry!(
                "gr_consistency_wait_seconds",
                "Time spent waiting on a consistency barrier",
                &["level"],
                registry,
            )
            .unwrap(),
            hold_gate_wait_outcomes: register_int_counter_vec_with_registry!(
                "gr_hold_gate_wait_outcomes_total",
                "Outcomes of waits on the hold-transactions gate",
                &["outcome"],
                registry,
            )
            .unwrap(),
            conflict_detection_enabled: register_int_gauge_with_registry!(
                "gr_conflict_detection_enabled",
                "1 if conflict detection is currently enabled, 0 otherwise",
                registry,
            )
            .unwrap(),
            group_gtid_executed_size: register_int_gauge_with_registry!(
                "gr_group_gtid_executed_intervals",
                "Number of disjoint intervals in group_gtid_executed for the group sid",
                registry,
            )
            .unwrap(),
        }
    }
}

pub fn initialise_metrics(registry: Registry) -> Arc<Metrics> {
    Arc::new(Metrics {
        node_metrics: NodeMetrics::new(&registry),
    })
}

#[cfg(any(test, feature = "test-util"))]
pub fn test_metrics() -> Arc<Metrics> {
    initialise_metrics(Registry::new())
}
