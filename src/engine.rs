// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! `Engine` is the `CoreContext` of spec.md §9: it owns the certifier,
//! coordinator, broadcaster and GCS adapter, is constructed at
//! `initialize` and torn down at `finalize`, and is the only thing
//! observer entry points hold a reference to (spec.md §9 "Cyclic observer
//! wiring" — observers never see coordinator/certifier internals).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::broadcaster::{BroadcastPeriods, BroadcastTask};
use crate::certifier::{CertifyOutcome, Certifier};
use crate::config::Config;
use crate::context::Context;
use crate::coordinator::{ConsistencyLevel, Coordinator};
use crate::error::{ConsensusError, ConsensusResult};
use crate::gcs::{GcsAdapter, GcsEvent};
use crate::gtid::{Gno, Gtid, GtidSet, Sid};
use crate::hold_gate::HoldTransactionsGate;
use crate::message::{OrderedMessage, Payload};
use crate::observer::CoreObserver;
use crate::view::{GroupView, MemberId, MemberStatus};

/// One submitted transaction's certification inputs, handed to
/// [`Engine::certify_and_register`] by the server-side transaction path.
pub struct TransactionRequest {
    pub thread_id: u64,
    pub snapshot_version: GtidSet,
    pub write_set: Vec<Vec<u8>>,
    pub generate_id: bool,
    pub specified_gtid: Option<Gtid>,
    pub local: bool,
    pub consistency_level: ConsistencyLevel,
}

/// Outcome of certifying and registering a transaction: the certifier's
/// verdict plus, on success, the consistency-record release handle the
/// caller awaits before reporting COMMIT to the session.
pub enum SubmitOutcome {
    Negative,
    Positive {
        gtid: Gtid,
        release: Arc<tokio::sync::Notify>,
    },
}

pub struct Engine {
    context: Arc<Context>,
    certifier: Arc<Certifier>,
    coordinator: Arc<Coordinator>,
    hold_gate: Arc<HoldTransactionsGate>,
    gcs: Arc<dyn GcsAdapter>,
    broadcaster: std::sync::Mutex<Option<BroadcastTask>>,
    next_thread_id: AtomicU64,
}

impl Engine {
    /// `initialize` (spec.md §9): constructs every component but does
    /// not yet join the group.
    pub fn new(own_id: MemberId, config: Config, gcs: Arc<dyn GcsAdapter>) -> ConsensusResult<Arc<Self>> {
        config.validate()?;
        let context = Arc::new(Context::new(own_id, config, prometheus::Registry::new()));
        let certifier = Arc::new(Certifier::new(context.clone()));
        let hold_gate = Arc::new(HoldTransactionsGate::new());
        let coordinator = Arc::new(Coordinator::new(context.clone(), gcs.clone(), hold_gate.clone()));
        Ok(Arc::new(Self {
            context,
            certifier,
            coordinator,
            hold_gate,
            gcs,
            broadcaster: std::sync::Mutex::new(None),
            next_thread_id: AtomicU64::new(1),
        }))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn certifier(&self) -> &Arc<Certifier> {
        &self.certifier
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Joins the group and starts the broadcast/GC background task.
    pub async fn start(self: &Arc<Self>) -> ConsensusResult<tokio::sync::mpsc::UnboundedReceiver<GcsEvent>> {
        let rx = self.gcs.join(self.context.own_id.clone()).await?;
        let task = BroadcastTask::spawn(
            self.context.clone(),
            self.certifier.clone(),
            self.gcs.clone(),
            BroadcastPeriods::default(),
        );
        *self.broadcaster.lock().unwrap() = Some(task);
        Ok(rx)
    }

    /// `finalize` (spec.md §9).
    pub async fn stop(&self) {
        self.coordinator.mark_stopping();
        if let Some(mut task) = self.broadcaster.lock().unwrap().take() {
            task.stop();
        }
        let _ = self.gcs.leave().await;
    }

    fn next_thread_id(&self) -> u64 {
        self.next_thread_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Certifies `request` and, on positive certification, registers it
    /// with the consistency coordinator. This is the body behind the
    /// server's pre-commit observer hook.
    pub async fn certify_and_register(&self, request: TransactionRequest) -> ConsensusResult<SubmitOutcome> {
        let originator = self.context.own_id.clone();
        let result = self.certifier.certify(
            &request.snapshot_version,
            &request.write_set,
            request.generate_id,
            request.specified_gtid,
            &originator,
            request.local,
        )?;

        let gtid = match result.outcome {
            CertifyOutcome::Negative => return Ok(SubmitOutcome::Negative),
            CertifyOutcome::Positive(gno) => Gtid::new(self.group_sid(), gno),
        };

        let members_to_prepare: HashSet<MemberId> = self
            .context
            .view()
            .online_members()
            .map(|m| m.id.clone())
            .filter(|id| id != &originator)
            .collect();

        let release = self
            .coordinator
            .after_certification(
                self.next_thread_id(),
                gtid,
                request.local,
                request.consistency_level,
                members_to_prepare,
            )
            .await;

        Ok(SubmitOutcome::Positive { gtid, release })
    }

    fn group_sid(&self) -> uuid::Uuid {
        self.context.config.group_name
    }

    /// Applies one incoming [`GcsEvent`] from the receiver returned by
    /// [`Engine::start`]. Intended to be driven by the caller's own event
    /// loop (the group-communication dispatch thread of spec.md §5).
    pub async fn handle_event(&self, event: GcsEvent) {
        match event {
            GcsEvent::View(view) => self.handle_view_change(view).await,
            GcsEvent::Message(message) => self.handle_message(message).await,
        }
    }

    async fn handle_view_change(&self, view: GroupView) {
        info!(view_id = view.view_id, "installing new view");
        let members: Vec<MemberId> = view.member_ids().into_iter().collect();
        self.certifier.handle_view_change(&members);
        self.coordinator.handle_member_leave(&view.left);
        self.context.install_view(view);
    }

    async fn handle_message(&self, message: OrderedMessage) {
        match message.payload {
            Payload::CertifierGc(data) => {
                let view_size = self.context.view().size();
                self.certifier
                    .handle_certifier_data(data.member, data.executed, view_size);
            }
            Payload::PrepareAck(ack) => {
                self.coordinator
                    .handle_remote_prepare(Gtid::new(ack.sid, ack.gno), &message.sender);
            }
            Payload::Transaction(_) | Payload::SyncBeforeExecution(_) | Payload::ViewChangeMarker(_) => {
                // Left to the external applier/observer pipeline; the
                // core only needs to route the envelope, not interpret
                // the opaque transaction payload.
            }
            Payload::MemberActions(_) => {
                // Persisted member-actions records are handled by the
                // plugin_handlers-equivalent layer, out of scope here.
            }
            Payload::Unknown { type_code, .. } => {
                warn!(type_code, "ignoring message of unknown type");
            }
        }
    }
}

#[async_trait]
impl CoreObserver for Engine {
    async fn before_dml(&self) -> ConsensusResult<()> {
        match self.context.own_status() {
            Some(MemberStatus::Error) => Err(ConsensusError::MemberError(self.context.own_id.clone())),
            _ => Ok(()),
        }
    }

    async fn before_transaction_begin(
        &self,
        _thread_id: u64,
        consistency_level: ConsistencyLevel,
        timeout: Duration,
        received_set: GtidSet,
    ) -> ConsensusResult<()> {
        let is_secondary_applier = !matches!(
            self.context.view().members.iter().find(|m| m.id == self.context.own_id).map(|m| m.role),
            Some(crate::view::MemberRole::Primary)
        );
        let certifier = self.certifier.clone();
        self.coordinator
            .before_transaction_begin(
                consistency_level,
                timeout,
                is_secondary_applier,
                || false,
                || matches!(self.context.own_status(), Some(MemberStatus::Error)),
                &received_set,
                move || certifier.group_gtid_executed(),
            )
            .await
    }

    async fn before_commit(&self, _thread_id: u64) -> ConsensusResult<Gno> {
        Err(ConsensusError::Internal(
            "before_commit must be driven through certify_and_register".to_string(),
        ))
    }

    async fn before_rollback(&self, _thread_id: u64) {}

    async fn after_commit(&self, sid: Sid, gno: Gno) {
        let gtid = Gtid::new(sid, gno);
        self.coordinator.after_commit(gtid);
    }

    async fn after_rollback(&self, sid: Sid, gno: Gno) {
        self.coordinator.fail(Gtid::new(sid, gno));
    }

    async fn primary_election_start(&self) {
        self.hold_gate.enable();
    }

    async fn primary_election_end(&self) {
        self.hold_gate.disable();
    }

    async fn applier_prepare(
        &self,
        sid: Sid,
        gno: Gno,
        _thread_id: u64,
        _member_status: MemberStatus,
    ) -> ConsensusResult<()> {
        self.coordinator.after_applier_prepare(Gtid::new(sid, gno)).await?;
        Ok(())
    }

    async fn member_leave(&self, leavers: Vec<MemberId>) {
        self.coordinator.handle_member_leave(&leavers);
    }

    async fn view_change(&self, view: GroupView) {
        self.handle_view_change(view).await;
    }

    async fn remote_prepare(&self, sid: Sid, gno: Gno, member: MemberId) {
        self.coordinator.handle_remote_prepare(Gtid::new(sid, gno), &member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcs::local::LocalGcsHub;

    #[tokio::test]
    async fn start_joins_and_installs_view() {
        let hub = LocalGcsHub::new(1024 * 1024);
        let engine = Engine::new(
            MemberId::from("a"),
            Config::default(),
            Arc::new(hub.handle()),
        )
        .unwrap();
        let mut rx = engine.start().await.unwrap();
        let event = rx.recv().await.unwrap();
        engine.handle_event(event).await;
        assert_eq!(engine.context().view().size(), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn certify_and_register_produces_positive_outcome() {
        let hub = LocalGcsHub::new(1024 * 1024);
        let engine = Engine::new(
            MemberId::from("a"),
            Config::default(),
            Arc::new(hub.handle()),
        )
        .unwrap();
        let mut rx = engine.start().await.unwrap();
        let event = rx.recv().await.unwrap();
        engine.handle_event(event).await;

        let outcome = engine
            .certify_and_register(TransactionRequest {
                thread_id: 1,
                snapshot_version: GtidSet::new(),
                write_set: vec![b"row".to_vec()],
                generate_id: true,
                specified_gtid: None,
                local: true,
                consistency_level: ConsistencyLevel::Eventual,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Positive { .. }));
        engine.stop().await;
    }
}
