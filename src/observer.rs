// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Observer surface (spec.md §6): the calls the server makes into the
//! core. Modeled as a trait rather than the original's C function-pointer
//! listener structs, so an `Engine` (or a test harness) can implement it
//! directly instead of wiring opaque handles across a plugin boundary
//! (spec.md §9 "Cyclic observer wiring").

use async_trait::async_trait;

use crate::coordinator::ConsistencyLevel;
use crate::error::ConsensusResult;
use crate::gtid::{Gno, GtidSet, Sid};
use crate::view::{GroupView, MemberId, MemberStatus};

/// Veto-capable pre-DML hook. `Err` aborts the statement.
#[async_trait]
pub trait CoreObserver: Send + Sync {
    /// Before a DML statement executes. Returning `Err` vetoes it (e.g.
    /// the local member is read-only or in ERROR state).
    async fn before_dml(&self) -> ConsensusResult<()>;

    /// Before a transaction begins; see
    /// [`crate::coordinator::Coordinator::before_transaction_begin`].
    /// `received_set` is the applier's received-transaction-set `R`
    /// (spec.md §4.5 "Before-transaction-begin"): the caller delivers it
    /// in-order from the sync-before-execution broadcast, since the
    /// applier pipeline that produces it is out of scope for the core.
    async fn before_transaction_begin(
        &self,
        thread_id: u64,
        consistency_level: ConsistencyLevel,
        timeout: std::time::Duration,
        received_set: GtidSet,
    ) -> ConsensusResult<()>;

    /// Blocking certification call before commit. `Ok(gno)` on positive
    /// certification; `Err` rolls the transaction back.
    async fn before_commit(&self, thread_id: u64) -> ConsensusResult<Gno>;

    /// Before a rollback (e.g. a negatively certified transaction
    /// unwinding). Infallible observation hook.
    async fn before_rollback(&self, thread_id: u64);

    /// After commit: release any local waiters on `(sid, gno)`.
    async fn after_commit(&self, sid: Sid, gno: Gno);

    /// After rollback: same bookkeeping as `after_commit` without the
    /// commit side effects.
    async fn after_rollback(&self, sid: Sid, gno: Gno);

    /// A primary election has started; secondary appliers should begin
    /// holding new transactions.
    async fn primary_election_start(&self);

    /// The newly elected primary's backlog has been applied.
    async fn primary_election_end(&self);

    /// The parallel applier has prepared `(sid, gno)` for `thread_id`.
    async fn applier_prepare(
        &self,
        sid: Sid,
        gno: Gno,
        thread_id: u64,
        member_status: MemberStatus,
    ) -> ConsensusResult<()>;

    /// One or more members left the view; release any consistency
    /// records waiting only on them.
    async fn member_leave(&self, leavers: Vec<MemberId>);

    /// A new view was installed by the group-communication engine.
    async fn view_change(&self, view: GroupView);

    /// A remote member acknowledged the prepare phase of `(sid, gno)`.
    async fn remote_prepare(&self, sid: Sid, gno: Gno, member: MemberId);
}
