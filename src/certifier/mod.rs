// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The Certifier (spec.md §4.3): deterministic optimistic concurrency
//! control plus GTID and parallel-applier-index assignment. Every member
//! runs the same algorithm over the same totally-ordered message stream,
//! so the same sequence of `certify` calls always produces the same
//! sequence of outcomes.

pub mod intervals;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::error::{ConsensusError, ConsensusResult};
use crate::gtid::{Gno, Gtid, GtidSet, Sid};
use crate::view::MemberId;

use intervals::GnoAllocator;

/// Outcome of one `certify` call. Exhaustion and internal errors are
/// reported through `ConsensusResult`'s `Err` arm instead of a third
/// variant, matching spec.md §7's fatal-error list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertifyOutcome {
    /// Certified positively. `gno` is the GTID assigned to the
    /// transaction (or the already-specified one, echoed back).
    Positive(Gno),
    Negative,
}

/// Parallel-applier dependency indices computed for a positively
/// certified transaction. Populated only for non-local transactions —
/// a transaction that already committed locally is never scheduled by
/// the parallel applier (spec.md §3, resolved as an Open Question in
/// DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelApplierIndices {
    pub last_committed: Gno,
    pub sequence_number: Gno,
}

/// Result of a `certify` call: the outcome, the transaction's
/// snapshot version extended with its own id, and (when applicable)
/// the indices the caller should stamp onto the outgoing event.
#[derive(Debug, Clone)]
pub struct CertificationResult {
    pub outcome: CertifyOutcome,
    pub snapshot_version: GtidSet,
    pub parallel_applier_indices: Option<ParallelApplierIndices>,
}

/// One write-set item's certification record: the snapshot version the
/// owning transaction committed with, and the parallel-applier sequence
/// number it was assigned. Reference-counted and shared by every item of
/// the same transaction, matching the original's per-transaction version
/// object.
#[derive(Debug)]
struct CertificationEntry {
    snapshot_version: GtidSet,
    sequence_number: Gno,
}

#[derive(Default)]
struct StableSetRound {
    contributions: HashMap<MemberId, GtidSet>,
}

struct CertifierState {
    conflict_detection_enabled: bool,
    certification_info: HashMap<Vec<u8>, Arc<CertificationEntry>>,
    group_gtid_executed: GtidSet,
    group_gtid_extracted: GtidSet,
    catching_up: bool,
    allocator: GnoAllocator,
    parallel_applier_last_committed_global: Gno,
    parallel_applier_sequence_number: Gno,
    last_conflict_free_gtid: Option<Gtid>,
    last_local_gtid: Option<Gtid>,
    round: StableSetRound,
}

/// A serializable snapshot of certification info, for state transfer to
/// a joining member (spec.md §4.3 `get/set_certification_info`). The
/// original shares one version object across every write-set item of a
/// transaction by reference count purely as a memory optimization; this
/// flattened form drops that sharing; it is rebuilt as independent
/// entries on `set_certification_info`; content and behavior are
/// unaffected.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CertificationInfoSnapshot {
    pub entries: Vec<(Vec<u8>, GtidSet, Gno)>,
    pub group_gtid_executed: GtidSet,
    pub group_gtid_extracted: GtidSet,
}

/// Deterministic optimistic-concurrency certifier for one member.
pub struct Certifier {
    context: Arc<Context>,
    group_sid: Sid,
    state: RwLock<CertifierState>,
}

impl Certifier {
    pub fn new(context: Arc<Context>) -> Self {
        let block_size = context.config.gtid_assignment_block_size;
        let group_sid = context.config.group_name;
        Self {
            context,
            group_sid,
            state: RwLock::new(CertifierState {
                conflict_detection_enabled: true,
                certification_info: HashMap::new(),
                group_gtid_executed: GtidSet::new(),
                group_gtid_extracted: GtidSet::new(),
                catching_up: false,
                allocator: GnoAllocator::new(block_size.max(1)),
                parallel_applier_last_committed_global: 0,
                parallel_applier_sequence_number: 1,
                last_conflict_free_gtid: None,
                last_local_gtid: None,
                round: StableSetRound::default(),
            }),
        }
    }

    pub fn enable_conflict_detection(&self) {
        let mut state = self.state.write();
        state.conflict_detection_enabled = true;
        self.context
            .metrics
            .node_metrics
            .conflict_detection_enabled
            .set(1);
    }

    pub fn disable_conflict_detection(&self) {
        let mut state = self.state.write();
        state.conflict_detection_enabled = false;
        self.context
            .metrics
            .node_metrics
            .conflict_detection_enabled
            .set(0);
    }

    pub fn last_conflict_free_gtid(&self) -> Option<Gtid> {
        self.state.read().last_conflict_free_gtid
    }

    pub fn last_local_gtid(&self) -> Option<Gtid> {
        self.state.read().last_local_gtid
    }

    pub fn group_gtid_executed(&self) -> GtidSet {
        self.state.read().group_gtid_executed.clone()
    }

    pub fn certification_info_size(&self) -> usize {
        self.state.read().certification_info.len()
    }

    /// Runs the certification algorithm of spec.md §4.3 under a single
    /// exclusive lock.
    pub fn certify(
        &self,
        snapshot_version: &GtidSet,
        write_set: &[Vec<u8>],
        generate_id: bool,
        specified_gtid: Option<Gtid>,
        originator: &MemberId,
        local: bool,
    ) -> ConsensusResult<CertificationResult> {
        let mut state = self.state.write();

        // Step 1: conflict detection, and collect each item's prior
        // entry for the parallel-applier index computation in step 6
        // regardless of whether conflict detection is enabled.
        let mut prior_entries = Vec::with_capacity(write_set.len());
        for w in write_set {
            let existing = state.certification_info.get(w).cloned();
            if state.conflict_detection_enabled {
                if let Some(entry) = &existing {
                    if !entry.snapshot_version.is_subset(snapshot_version) {
                        self.record_outcome(&mut state, false, local);
                        return Ok(CertificationResult {
                            outcome: CertifyOutcome::Negative,
                            snapshot_version: snapshot_version.clone(),
                            parallel_applier_indices: None,
                        });
                    }
                }
            }
            prior_entries.push(existing);
        }

        // Step 2: clear the catching-up flag once the applier has fully
        // caught up with what was imported from the donor.
        if state.catching_up
            && state
                .group_gtid_extracted
                .is_subset_not_equals(&state.group_gtid_executed)
        {
            state.catching_up = false;
        }

        let mut snapshot_version = snapshot_version.clone();
        let gtid = if generate_id {
            let sid = self.group_sid;
            let used = if state.catching_up {
                state.group_gtid_extracted.clone()
            } else {
                state.group_gtid_executed.clone()
            };
            let block_size = state.allocator.block_size();
            let originator = originator.clone();
            let gno = if block_size <= 1 {
                intervals::next_sequential(&used, &sid)
            } else {
                state.allocator.allocate_for_member(&used, &sid, &originator)
            }
            .map_err(|_| {
                error!(
                    group = %sid,
                    "GNO space exhausted for group; restart required with a new group name"
                );
                ConsensusError::CertificationExhausted
            })?;
            let gtid = Gtid::new(sid, gno);
            snapshot_version.add(gtid);
            gtid
        } else {
            let gtid = specified_gtid.ok_or_else(|| {
                ConsensusError::Internal("specified certification with no gtid".to_string())
            })?;
            let used = if state.catching_up {
                &state.group_gtid_extracted
            } else {
                &state.group_gtid_executed
            };
            if used.contains(&gtid) {
                self.record_outcome(&mut state, false, local);
                return Ok(CertificationResult {
                    outcome: CertifyOutcome::Negative,
                    snapshot_version,
                    parallel_applier_indices: None,
                });
            }
            snapshot_version.add(gtid);
            gtid
        };

        state.group_gtid_executed.add(gtid);
        if state.catching_up {
            state.group_gtid_extracted.add(gtid);
        }

        // Step 5: insert/replace the certification entry for every
        // write-set item, sharing one version object across all of them.
        let current_sequence_number = state.parallel_applier_sequence_number;
        let shared_entry = Arc::new(CertificationEntry {
            snapshot_version: snapshot_version.clone(),
            sequence_number: current_sequence_number,
        });
        for w in write_set {
            state
                .certification_info
                .insert(w.clone(), shared_entry.clone());
        }

        // Step 6: parallel-applier indices.
        let mut transaction_last_committed = state.parallel_applier_last_committed_global;
        for prior in prior_entries.into_iter().flatten() {
            let p_w = prior.sequence_number;
            if p_w > transaction_last_committed && p_w != current_sequence_number {
                transaction_last_committed = p_w;
            }
        }
        let write_set_empty = write_set.is_empty();
        if write_set_empty {
            transaction_last_committed = current_sequence_number - 1;
        }
        state.parallel_applier_sequence_number += 1;
        if write_set_empty {
            state.parallel_applier_last_committed_global =
                state.parallel_applier_sequence_number;
        }

        let indices = if local {
            None
        } else {
            Some(ParallelApplierIndices {
                last_committed: transaction_last_committed,
                sequence_number: current_sequence_number,
            })
        };

        // Step 7
        state.last_conflict_free_gtid = Some(gtid);
        if local {
            state.last_local_gtid = Some(gtid);
        }

        // Step 8
        self.record_outcome(&mut state, true, local);
        self.update_executed_size_metric(&state);

        Ok(CertificationResult {
            outcome: CertifyOutcome::Positive(gtid.gno),
            snapshot_version,
            parallel_applier_indices: indices,
        })
    }

    fn record_outcome(&self, _state: &mut CertifierState, positive: bool, local: bool) {
        let result = if positive { "positive" } else { "negative" };
        let locality = if local { "local" } else { "remote" };
        self.context
            .metrics
            .node_metrics
            .certifications
            .with_label_values(&[result, locality])
            .inc();
    }

    /// Refreshes the `group_gtid_executed_size` gauge: the number of
    /// disjoint intervals currently recorded for this group's sid.
    fn update_executed_size_metric(&self, state: &CertifierState) {
        let size = state.group_gtid_executed.intervals_for(&self.group_sid).len();
        self.context
            .metrics
            .node_metrics
            .group_gtid_executed_size
            .set(size as i64);
    }

    /// Adds an already-fully-specified GTID (e.g. a view-change marker)
    /// directly to `group_gtid_executed`, bypassing certification.
    pub fn add_specified_gtid_to_group_gtid_executed(&self, gtid: Gtid, _local: bool) {
        let mut state = self.state.write();
        state.group_gtid_executed.add(gtid);
        if state.catching_up {
            state.group_gtid_extracted.add(gtid);
        }
        self.update_executed_size_metric(&state);
    }

    /// Allocates a GNO for a view-change marker. Always drawn from the
    /// sequential policy, independent of the configured block size, so
    /// every member computes the same value (spec.md §4.3).
    pub fn generate_view_change_group_gno(&self) -> ConsensusResult<Gno> {
        let state = self.state.read();
        let used = if state.catching_up {
            &state.group_gtid_extracted
        } else {
            &state.group_gtid_executed
        };
        intervals::next_sequential(used, &self.group_sid).map_err(|_| {
            error!("GNO space exhausted while allocating view-change marker");
            ConsensusError::CertificationExhausted
        })
    }

    /// Updates the stable set and garbage-collects certification info
    /// whose snapshot version is already covered by it.
    pub fn set_group_stable_transactions_set(&self, stable: &GtidSet) {
        let mut state = self.state.write();
        let before = state.certification_info.len();
        state
            .certification_info
            .retain(|_, entry| !entry.snapshot_version.is_subset(stable));
        let removed = before - state.certification_info.len();

        // Force a full parallel-applier barrier: history loss from GC
        // could otherwise under-report a dependency.
        state.parallel_applier_last_committed_global = state.parallel_applier_sequence_number;
        state.parallel_applier_sequence_number += 1;

        self.context.metrics.node_metrics.gc_sweeps_total.inc();
        self.context
            .metrics
            .node_metrics
            .gc_entries_removed_total
            .inc_by(removed as u64);
        info!(removed, "stable-set garbage collection sweep");
    }

    /// Absorbs one member's executed-set broadcast. When every member of
    /// `view_size` has contributed this round, intersects all
    /// contributions and triggers garbage collection.
    pub fn handle_certifier_data(
        &self,
        member: MemberId,
        executed: GtidSet,
        view_size: usize,
    ) {
        let stable = {
            let mut state = self.state.write();
            state.round.contributions.entry(member).or_insert(executed);
            if state.round.contributions.len() < view_size {
                return;
            }
            let mut iter = state.round.contributions.values();
            let mut stable = iter.next().cloned().unwrap_or_default();
            for other in iter {
                stable = stable.intersect(other);
            }
            state.round.contributions.clear();
            stable
        };
        self.context
            .metrics
            .node_metrics
            .stable_set_rounds_total
            .inc();
        self.set_group_stable_transactions_set(&stable);
    }

    /// Drops any partial stable-set round and per-member GNO block
    /// reservations held by members no longer present in `members`.
    pub fn handle_view_change(&self, members: &[MemberId]) {
        let present: HashSet<MemberId> = members.iter().cloned().collect();
        let mut state = self.state.write();
        state.round.contributions.clear();
        state.allocator.retain_members(&present);
    }

    pub fn get_certification_info(&self) -> CertificationInfoSnapshot {
        let state = self.state.read();
        CertificationInfoSnapshot {
            entries: state
                .certification_info
                .iter()
                .map(|(w, e)| (w.clone(), e.snapshot_version.clone(), e.sequence_number))
                .collect(),
            group_gtid_executed: state.group_gtid_executed.clone(),
            group_gtid_extracted: state.group_gtid_extracted.clone(),
        }
    }

    /// Restores certification info from a donor, marking this member as
    /// catching up: GNO allocation draws from the complement of
    /// `extracted` until the applier has replayed every donor
    /// transaction (spec.md §4.3 "Catch-up semantics").
    pub fn set_certification_info(&self, snapshot: CertificationInfoSnapshot) {
        let mut state = self.state.write();
        state.certification_info = snapshot
            .entries
            .into_iter()
            .map(|(w, version, sequence_number)| {
                (
                    w,
                    Arc::new(CertificationEntry {
                        snapshot_version: version,
                        sequence_number,
                    }),
                )
            })
            .collect();
        state.group_gtid_executed = snapshot.group_gtid_executed.clone();
        state.group_gtid_extracted = snapshot.group_gtid_executed;
        state.catching_up = true;
        self.update_executed_size_metric(&state);
    }

    /// True while this member is still replaying transactions imported
    /// from a donor during distributed recovery.
    pub fn is_catching_up(&self) -> bool {
        self.state.read().catching_up
    }
}

impl std::fmt::Debug for Certifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Certifier")
            .field("certification_info_size", &state.certification_info.len())
            .field("catching_up", &state.catching_up)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certifier() -> Certifier {
        Certifier::new(Context::new_for_test())
    }

    #[test]
    fn scenario_s1_remote_transaction_gets_parallel_applier_indices() {
        let certifier = certifier();
        let originator = MemberId::from("member-1");
        let empty = GtidSet::new();

        let result = certifier
            .certify(&empty, &[b"t1".to_vec()], true, None, &originator, false)
            .unwrap();
        assert!(matches!(result.outcome, CertifyOutcome::Positive(_)));
        let indices = result.parallel_applier_indices.unwrap();
        assert_eq!(indices.last_committed, 0);
        assert_eq!(indices.sequence_number, 1);
    }

    #[test]
    fn local_transaction_gets_no_parallel_applier_indices() {
        let certifier = certifier();
        let originator = MemberId::from("member-1");
        let empty = GtidSet::new();

        let result = certifier
            .certify(&empty, &[b"t1".to_vec()], true, None, &originator, true)
            .unwrap();
        assert!(result.parallel_applier_indices.is_none());
    }

    #[test]
    fn conflicting_write_set_is_negatively_certified() {
        let certifier = certifier();
        let originator = MemberId::from("member-1");
        let empty = GtidSet::new();

        let first = certifier
            .certify(&empty, &[b"row".to_vec()], true, None, &originator, false)
            .unwrap();
        assert!(matches!(first.outcome, CertifyOutcome::Positive(_)));

        // A second transaction that read an older snapshot (not
        // including the first transaction's GTID) touching the same row
        // must be rejected.
        let second = certifier
            .certify(&empty, &[b"row".to_vec()], true, None, &originator, false)
            .unwrap();
        assert_eq!(second.outcome, CertifyOutcome::Negative);
    }

    #[test]
    fn non_conflicting_snapshot_is_positively_certified() {
        let certifier = certifier();
        let originator = MemberId::from("member-1");
        let empty = GtidSet::new();

        let first = certifier
            .certify(&empty, &[b"row".to_vec()], true, None, &originator, false)
            .unwrap();
        let CertifyOutcome::Positive(gno) = first.outcome else {
            panic!("expected positive");
        };

        let second = certifier
            .certify(
                &first.snapshot_version,
                &[b"row".to_vec()],
                true,
                None,
                &originator,
                false,
            )
            .unwrap();
        assert!(matches!(second.outcome, CertifyOutcome::Positive(g) if g > gno));
    }

    #[test]
    fn duplicate_specified_gtid_is_negative() {
        let certifier = certifier();
        let originator = MemberId::from("member-1");
        let empty = GtidSet::new();
        let sid = uuid::Uuid::from_u128(7);
        let gtid = Gtid::new(sid, 1);

        let first = certifier
            .certify(&empty, &[], false, Some(gtid), &originator, true)
            .unwrap();
        assert!(matches!(first.outcome, CertifyOutcome::Positive(_)));

        let second = certifier
            .certify(&empty, &[], false, Some(gtid), &originator, true)
            .unwrap();
        assert_eq!(second.outcome, CertifyOutcome::Negative);
    }

    #[test]
    fn stable_set_garbage_collects_covered_entries() {
        let certifier = certifier();
        let originator = MemberId::from("member-1");
        let empty = GtidSet::new();

        let result = certifier
            .certify(&empty, &[b"row".to_vec()], true, None, &originator, true)
            .unwrap();
        assert_eq!(certifier.certification_info_size(), 1);

        certifier.set_group_stable_transactions_set(&result.snapshot_version);
        assert_eq!(certifier.certification_info_size(), 0);
    }

    #[test]
    fn view_change_drops_partial_round_and_stale_blocks() {
        let certifier = certifier();
        certifier.handle_certifier_data(
            MemberId::from("a"),
            GtidSet::new(),
            2,
        );
        certifier.handle_view_change(&[MemberId::from("a")]);
        // Round cleared; a second contribution from "a" alone does not
        // complete a 2-member round.
        certifier.handle_certifier_data(MemberId::from("a"), GtidSet::new(), 2);
    }

    #[test]
    fn handle_certifier_data_completes_round_and_gcs() {
        let certifier = certifier();
        let originator = MemberId::from("member-1");
        let empty = GtidSet::new();
        let result = certifier
            .certify(&empty, &[b"row".to_vec()], true, None, &originator, true)
            .unwrap();

        certifier.handle_certifier_data(
            MemberId::from("a"),
            result.snapshot_version.clone(),
            2,
        );
        assert_eq!(certifier.certification_info_size(), 1);
        certifier.handle_certifier_data(MemberId::from("b"), result.snapshot_version, 2);
        assert_eq!(certifier.certification_info_size(), 0);
    }

    #[test]
    fn view_change_marker_gno_is_sequential_regardless_of_block_size() {
        let ctx = Context::new_for_test();
        let certifier = Certifier::new(ctx);
        let gno = certifier.generate_view_change_group_gno().unwrap();
        assert_eq!(gno, 1);
    }
}
