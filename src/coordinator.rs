// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction Consistency Coordinator (spec.md §4.5): a distributed
//! prepare/commit barrier for transactions flagged with a strong
//! consistency level. Registrations and releases run under one lock
//! (teacher's convention of a single `parking_lot::RwLock` guarding a
//! small map rather than per-record locks); waits themselves are async,
//! driven by `tokio::sync::Notify`, since they interleave with GCS
//! delivery on the same task pool as the rest of the core.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{ConsensusError, ConsensusResult};
use crate::gcs::GcsAdapter;
use crate::gtid::{Gno, Gtid, GtidSet, Sid};
use crate::hold_gate::{HoldGateError, HoldTransactionsGate};
use crate::view::MemberId;

pub type ThreadId = u64;

/// Strength of the consistency guarantee requested for one transaction
/// (spec.md §3 "Transaction Consistency Record").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Eventual,
    Before,
    After,
    BeforeAndAfter,
    BeforeOnPrimaryFailover,
}

impl ConsistencyLevel {
    fn needs_before_sync(self) -> bool {
        matches!(self, ConsistencyLevel::Before | ConsistencyLevel::BeforeAndAfter)
    }

    fn is_after_precedent(self) -> bool {
        matches!(self, ConsistencyLevel::After | ConsistencyLevel::BeforeAndAfter)
    }

    /// Metric label for `consistency_wait_seconds`.
    fn metric_label(self) -> &'static str {
        match self {
            ConsistencyLevel::Eventual => "eventual",
            ConsistencyLevel::Before => "before",
            ConsistencyLevel::After => "after",
            ConsistencyLevel::BeforeAndAfter => "before_and_after",
            ConsistencyLevel::BeforeOnPrimaryFailover => "before_on_primary_failover",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Commit,
    Rollback,
}

struct TransactionConsistencyRecord {
    thread_id: ThreadId,
    local: bool,
    gtid: Gtid,
    consistency_level: ConsistencyLevel,
    members_to_prepare: HashSet<MemberId>,
    prepared_locally: bool,
    prepared_remotely: bool,
    release: Arc<Notify>,
    is_after_precedent: bool,
}

/// Distributed prepare/commit barrier engine for BEFORE/AFTER/
/// BEFORE_AND_AFTER transactions (spec.md §4.5).
pub struct Coordinator {
    context: Arc<Context>,
    gcs: Arc<dyn GcsAdapter>,
    hold_gate: Arc<HoldTransactionsGate>,
    records: RwLock<HashMap<(Sid, Gno), TransactionConsistencyRecord>>,
    /// AAFTER/BEFORE_AND_AFTER records not yet released. A BEFORE
    /// transaction beginning while this is non-empty holds until it
    /// drains (spec.md §4.5 "hold this transaction until those drain").
    pending_after: RwLock<Vec<Arc<Notify>>>,
    /// Per-GTID wake list for `after_commit`, independent of the
    /// prepare/commit release above (spec.md §4.5 "After-commit").
    commit_waiters: RwLock<HashMap<Gtid, Vec<Arc<Notify>>>>,
    stopping: std::sync::atomic::AtomicBool,
}

impl Coordinator {
    pub fn new(context: Arc<Context>, gcs: Arc<dyn GcsAdapter>, hold_gate: Arc<HoldTransactionsGate>) -> Self {
        Self {
            context,
            gcs,
            hold_gate,
            records: RwLock::new(HashMap::new()),
            pending_after: RwLock::new(Vec::new()),
            commit_waiters: RwLock::new(HashMap::new()),
            stopping: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn mark_stopping(&self) {
        self.stopping.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Registers a waiter for `gtid` becoming locally committed, for use
    /// by the BEFORE sync wait below. The caller's applier notifies it
    /// via `after_commit` once the GTID is applied.
    pub fn register_commit_waiter(&self, gtid: Gtid) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.commit_waiters
            .write()
            .entry(gtid)
            .or_default()
            .push(notify.clone());
        notify
    }

    /// Called by the server observer before a transaction begins
    /// (spec.md §4.5 "Before-transaction-begin").
    pub async fn before_transaction_begin(
        &self,
        consistency_level: ConsistencyLevel,
        timeout_budget: Duration,
        is_secondary_applier: bool,
        is_killed: impl Fn() -> bool + Send + Sync,
        is_member_error: impl Fn() -> bool + Send + Sync,
        required: &GtidSet,
        currently_applied: impl Fn() -> GtidSet,
    ) -> ConsensusResult<()> {
        let wait_started = std::time::Instant::now();
        let result = self
            .before_transaction_begin_inner(
                consistency_level,
                timeout_budget,
                is_secondary_applier,
                is_killed,
                is_member_error,
                required,
                currently_applied,
            )
            .await;
        self.context
            .metrics
            .node_metrics
            .consistency_wait_seconds
            .with_label_values(&[consistency_level.metric_label()])
            .observe(wait_started.elapsed().as_secs_f64());
        result
    }

    async fn before_transaction_begin_inner(
        &self,
        consistency_level: ConsistencyLevel,
        timeout_budget: Duration,
        is_secondary_applier: bool,
        is_killed: impl Fn() -> bool + Send + Sync,
        is_member_error: impl Fn() -> bool + Send + Sync,
        required: &GtidSet,
        currently_applied: impl Fn() -> GtidSet,
    ) -> ConsensusResult<()> {
        if matches!(consistency_level, ConsistencyLevel::BeforeOnPrimaryFailover)
            && is_secondary_applier
        {
            let outcome = self
                .hold_gate
                .wait_until_primary_failover_complete(timeout_budget, is_killed, is_member_error);
            let outcome_label = match &outcome {
                Ok(()) => "cleared",
                Err(HoldGateError::TimedOut) => "timed_out",
                Err(HoldGateError::Killed) => "killed",
                Err(HoldGateError::MemberError) => "member_error",
            };
            self.context
                .metrics
                .node_metrics
                .hold_gate_wait_outcomes
                .with_label_values(&[outcome_label])
                .inc();
            return outcome.map_err(|e| match e {
                HoldGateError::TimedOut => ConsensusError::ConsistencyTimeout,
                HoldGateError::Killed => {
                    ConsensusError::Internal("session killed awaiting primary failover".into())
                }
                HoldGateError::MemberError => {
                    ConsensusError::MemberError(self.context.own_id.clone())
                }
            });
        }

        if consistency_level.needs_before_sync() {
            self.gcs
                .send_message(
                    crate::message::Payload::SyncBeforeExecution(
                        crate::message::SyncBeforeExecution { thread_id: 0 },
                    ),
                    false,
                )
                .await?;
            return self
                .wait_for_applied(required, timeout_budget, currently_applied)
                .await;
        }

        self.wait_for_after_precedents_to_drain(timeout_budget).await
    }

    async fn wait_for_applied(
        &self,
        required: &GtidSet,
        timeout_budget: Duration,
        currently_applied: impl Fn() -> GtidSet,
    ) -> ConsensusResult<()> {
        let notifies: Vec<Arc<Notify>> = required
            .sids()
            .flat_map(|sid| {
                required
                    .intervals_for(sid)
                    .iter()
                    .flat_map(move |iv| (iv.start..=iv.end).map(move |gno| Gtid::new(*sid, gno)))
            })
            .filter(|gtid| !currently_applied().contains(gtid))
            .map(|gtid| self.register_commit_waiter(gtid))
            .collect();

        if notifies.is_empty() {
            return Ok(());
        }

        // Polled concurrently (not one at a time) so every waiter
        // registers with its Notify on the first poll: a `notify_waiters`
        // call racing ahead of a later, not-yet-polled waiter would
        // otherwise be silently missed.
        let wait_all = futures::future::join_all(notifies.iter().map(|n| n.notified()));
        timeout(timeout_budget, wait_all)
            .await
            .map(|_| ())
            .map_err(|_| ConsensusError::ConsistencyTimeout)
    }

    async fn wait_for_after_precedents_to_drain(&self, timeout_budget: Duration) -> ConsensusResult<()> {
        loop {
            let next = self.pending_after.read().first().cloned();
            let Some(notify) = next else {
                return Ok(());
            };
            timeout(timeout_budget, notify.notified())
                .await
                .map_err(|_| ConsensusError::ConsistencyTimeout)?;
        }
    }

    /// Registers the consistency record for a freshly certified
    /// transaction (spec.md §4.5 "After-certification").
    pub async fn after_certification(
        &self,
        thread_id: ThreadId,
        gtid: Gtid,
        local: bool,
        consistency_level: ConsistencyLevel,
        members_to_prepare: HashSet<MemberId>,
    ) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        let is_after_precedent = consistency_level.is_after_precedent();

        if members_to_prepare.is_empty() || self.stopping.load(std::sync::atomic::Ordering::SeqCst) {
            release.notify_one();
            return release;
        }

        if is_after_precedent {
            self.pending_after.write().push(release.clone());
        }

        self.records.write().insert(
            (gtid.sid, gtid.gno),
            TransactionConsistencyRecord {
                thread_id,
                local,
                gtid,
                consistency_level,
                members_to_prepare,
                prepared_locally: false,
                prepared_remotely: false,
                release: release.clone(),
                is_after_precedent,
            },
        );
        release
    }

    /// Spec.md §4.5 "After-applier-prepare". Returns `Some(Commit)` when
    /// both local and remote prepare are satisfied; otherwise broadcasts
    /// a prepare-ack and returns `None`.
    pub async fn after_applier_prepare(&self, gtid: Gtid) -> ConsensusResult<Option<CommitOutcome>> {
        let ready = {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(&(gtid.sid, gtid.gno)) else {
                return Ok(None);
            };
            record.prepared_locally = true;
            record.prepared_remotely
        };

        if ready {
            self.release(gtid, CommitOutcome::Commit);
            return Ok(Some(CommitOutcome::Commit));
        }

        self.context
            .metrics
            .node_metrics
            .prepare_acks_sent_total
            .inc();
        self.gcs
            .send_message(
                crate::message::Payload::PrepareAck(crate::message::PrepareAck {
                    sid: gtid.sid,
                    gno: gtid.gno,
                }),
                false,
            )
            .await?;
        Ok(None)
    }

    /// Spec.md §4.5 "Handle-remote-prepare".
    pub fn handle_remote_prepare(&self, gtid: Gtid, member: &MemberId) {
        self.context
            .metrics
            .node_metrics
            .prepare_acks_received_total
            .inc();
        let ready = {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(&(gtid.sid, gtid.gno)) else {
                return;
            };
            record.members_to_prepare.remove(member);
            if record.members_to_prepare.is_empty() {
                record.prepared_remotely = true;
            }
            record.prepared_remotely && record.prepared_locally
        };
        if ready {
            self.release(gtid, CommitOutcome::Commit);
        }
    }

    /// Spec.md §4.5 "Handle-member-leave".
    pub fn handle_member_leave(&self, leavers: &[MemberId]) {
        let to_release: Vec<Gtid> = {
            let mut records = self.records.write();
            let mut released = Vec::new();
            for record in records.values_mut() {
                for leaver in leavers {
                    record.members_to_prepare.remove(leaver);
                }
                if record.members_to_prepare.is_empty() {
                    record.prepared_remotely = true;
                    released.push(record.gtid);
                }
            }
            released
        };
        for gtid in to_release {
            debug!(%gtid, "releasing consistency record after member leave");
            self.release(gtid, CommitOutcome::Commit);
        }
    }

    /// Spec.md §4.5 "After-commit": wakes local waiters registered on
    /// this GTID (the BEFORE sync path) and drops the record.
    pub fn after_commit(&self, gtid: Gtid) {
        if let Some(notifies) = self.commit_waiters.write().remove(&gtid) {
            for n in notifies {
                // `notify_one`, not `notify_waiters`: each entry here is a
                // single-consumer handle returned by `register_commit_waiter`,
                // and its waiter may not have started `.notified().await` yet.
                // `notify_waiters` stores no permit for a not-yet-registered
                // waiter and the wakeup would be silently dropped; `notify_one`
                // stores one permit so the eventual `.notified()` still fires.
                n.notify_one();
            }
        }
        self.records.write().remove(&(gtid.sid, gtid.gno));
    }

    /// Fails every open record for `gtid` (broadcast of its prepare-ack
    /// failed, or a fatal error elsewhere), releasing waiters with a
    /// rollback outcome.
    pub fn fail(&self, gtid: Gtid) {
        warn!(%gtid, "failing open consistency record");
        self.release(gtid, CommitOutcome::Rollback);
    }

    fn release(&self, gtid: Gtid, _outcome: CommitOutcome) {
        let record = self.records.write().remove(&(gtid.sid, gtid.gno));
        if let Some(record) = record {
            if record.is_after_precedent {
                self.pending_after
                    .write()
                    .retain(|n| !Arc::ptr_eq(n, &record.release));
            }
            // `notify_one`: `release` is consumed by exactly one caller
            // (whoever is blocked in `before_transaction_begin` or holding
            // the handle from `after_certification`), who may call
            // `.notified()` after this runs. `notify_waiters` would drop
            // that wakeup since it stores no permit for a future waiter.
            record.release.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcs::local::LocalGcsHub;

    fn coordinator() -> Coordinator {
        let hub = LocalGcsHub::new(1024 * 1024);
        Coordinator::new(
            Context::new_for_test(),
            Arc::new(hub.handle()),
            Arc::new(HoldTransactionsGate::new()),
        )
    }

    #[tokio::test]
    async fn single_member_group_releases_immediately() {
        let coordinator = coordinator();
        let gtid = Gtid::new(uuid::Uuid::nil(), 1);
        let release = coordinator
            .after_certification(1, gtid, true, ConsistencyLevel::After, HashSet::new())
            .await;
        assert!(timeout(Duration::from_millis(50), release.notified())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn after_commit_wakes_a_registered_waiter() {
        let coordinator = coordinator();
        let gtid = Gtid::new(uuid::Uuid::nil(), 1);
        let waiter = coordinator.register_commit_waiter(gtid);
        coordinator.after_commit(gtid);
        assert!(timeout(Duration::from_millis(50), waiter.notified())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn handle_remote_prepare_releases_once_all_members_ack() {
        let coordinator = coordinator();
        let gtid = Gtid::new(uuid::Uuid::nil(), 1);
        let mut members = HashSet::new();
        members.insert(MemberId::from("b"));
        members.insert(MemberId::from("c"));
        let release = coordinator
            .after_certification(1, gtid, true, ConsistencyLevel::After, members)
            .await;

        coordinator
            .after_applier_prepare(gtid)
            .await
            .unwrap();
        coordinator.handle_remote_prepare(gtid, &MemberId::from("b"));
        assert!(timeout(Duration::from_millis(20), release.notified())
            .await
            .is_err());
        coordinator.handle_remote_prepare(gtid, &MemberId::from("c"));
        assert!(timeout(Duration::from_millis(50), release.notified())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn member_leave_releases_pending_records() {
        let coordinator = coordinator();
        let gtid = Gtid::new(uuid::Uuid::nil(), 1);
        let mut members = HashSet::new();
        members.insert(MemberId::from("b"));
        let release = coordinator
            .after_certification(1, gtid, true, ConsistencyLevel::After, members)
            .await;
        coordinator.after_applier_prepare(gtid).await.unwrap();
        coordinator.handle_member_leave(&[MemberId::from("b")]);
        assert!(timeout(Duration::from_millis(50), release.notified())
            .await
            .is_ok());
    }
}
