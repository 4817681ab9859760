// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! An in-memory `GcsAdapter` used by tests and single-process demos. It is
//! ambient test tooling standing in for the (out-of-scope) group
//! communication engine: a single dispatcher task serializes every
//! `send_message` call, which trivially gives every joined member the same
//! total order — the one guarantee the rest of the core assumes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::error::{ConsensusError, ConsensusResult};
use crate::message::{MessageHeader, OrderedMessage, Payload};
use crate::view::{GroupView, Member, MemberId, MemberRole, MemberStatus, ViewErrorCode};

use super::{ForceMembersSpec, GcsAdapter, GcsEvent, LeaveOutcome, SendOutcome};

struct HubInner {
    subscribers: RwLock<HashMap<MemberId, UnboundedSender<GcsEvent>>>,
    view: RwLock<GroupView>,
    max_message_size: usize,
}

/// Shared bus connecting every `LocalGcsAdapter` handle in a test or demo
/// process. Construct one per simulated group.
#[derive(Clone)]
pub struct LocalGcsHub {
    inner: Arc<HubInner>,
}

impl LocalGcsHub {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: RwLock::new(HashMap::new()),
                view: RwLock::new(GroupView {
                    view_id: 0,
                    members: Vec::new(),
                    joined: Vec::new(),
                    left: Vec::new(),
                    error: ViewErrorCode::Ok,
                }),
                max_message_size,
            }),
        }
    }

    pub fn handle(&self) -> LocalGcsAdapter {
        LocalGcsAdapter {
            hub: self.clone(),
            write_concurrency: Arc::new(AtomicU32::new(1)),
            protocol_version: Arc::new(AtomicU32::new(1)),
            own_id: RwLock::new(None),
            next_view_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Takes the subscribers lock in write mode purely to serialize
    /// concurrent broadcasts: every member must observe the exact same
    /// relative order of messages, which requires one broadcast to fully
    /// complete (fan out to every subscriber) before the next begins.
    fn broadcast(&self, event: GcsEvent) {
        let subs = self.inner.subscribers.write();
        for (id, tx) in subs.iter() {
            if tx.send(event.clone()).is_err() {
                warn!("local GCS subscriber {id} dropped its receiver");
            }
        }
    }

    fn install_view(&self, joined: Vec<MemberId>, left: Vec<MemberId>) -> GroupView {
        let mut view = self.inner.view.write();
        let mut members: Vec<Member> = view
            .members
            .iter()
            .filter(|m| !left.contains(&m.id))
            .cloned()
            .collect();
        for id in &joined {
            members.push(Member {
                id: id.clone(),
                server_uuid: uuid::Uuid::new_v4(),
                host: "local".to_string(),
                port: 0,
                weight: 50,
                role: if members.is_empty() {
                    MemberRole::Primary
                } else {
                    MemberRole::Secondary
                },
                status: MemberStatus::Online,
                capability_version: 1,
            });
        }
        let next_view = GroupView {
            view_id: view.view_id + 1,
            members,
            joined,
            left,
            error: ViewErrorCode::Ok,
        };
        *view = next_view.clone();
        next_view
    }
}

/// Per-member handle onto a [`LocalGcsHub`].
pub struct LocalGcsAdapter {
    hub: LocalGcsHub,
    write_concurrency: Arc<AtomicU32>,
    protocol_version: Arc<AtomicU32>,
    own_id: RwLock<Option<MemberId>>,
    next_view_id: Arc<AtomicU64>,
}

#[async_trait]
impl GcsAdapter for LocalGcsAdapter {
    async fn join(&self, own_id: MemberId) -> ConsensusResult<UnboundedReceiver<GcsEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub
            .inner
            .subscribers
            .write()
            .insert(own_id.clone(), tx);
        *self.own_id.write() = Some(own_id.clone());
        info!("member {own_id} joining local group");
        let view = self.hub.install_view(vec![own_id], vec![]);
        self.next_view_id.store(view.view_id, Ordering::SeqCst);
        self.hub.broadcast(GcsEvent::View(view));
        Ok(rx)
    }

    async fn leave(&self) -> ConsensusResult<LeaveOutcome> {
        let Some(own_id) = self.own_id.read().clone() else {
            return Ok(LeaveOutcome::AlreadyLeft);
        };
        self.hub.inner.subscribers.write().remove(&own_id);
        let view = self.hub.install_view(vec![], vec![own_id.clone()]);
        self.hub.broadcast(GcsEvent::View(view));
        Ok(LeaveOutcome::NowLeaving)
    }

    async fn send_message(
        &self,
        payload: Payload,
        skip_if_not_initialized: bool,
    ) -> ConsensusResult<SendOutcome> {
        let Some(own_id) = self.own_id.read().clone() else {
            if skip_if_not_initialized {
                return Ok(SendOutcome::Nok);
            }
            return Err(ConsensusError::Communication("not joined".to_string()));
        };
        let encoded = payload.encode();
        if encoded.len() > self.hub.inner.max_message_size {
            return Ok(SendOutcome::TooBig);
        }
        let header = MessageHeader {
            cargo_type: crate::message::CargoType::Transaction,
            protocol_version: self.protocol_version.load(Ordering::SeqCst),
            payload_length: encoded.len() as u32,
        };
        self.hub.broadcast(GcsEvent::Message(OrderedMessage {
            header,
            sender: own_id,
            payload,
        }));
        Ok(SendOutcome::Ok)
    }

    async fn force_members(&self, spec: ForceMembersSpec) -> ConsensusResult<()> {
        let current: Vec<MemberId> = self.hub.inner.view.read().member_ids().into_iter().collect();
        let left: Vec<MemberId> = current
            .into_iter()
            .filter(|id| !spec.members.contains(id))
            .collect();
        let joined: Vec<MemberId> = spec
            .members
            .into_iter()
            .filter(|id| !self.hub.inner.view.read().contains(id))
            .collect();
        let view = self.hub.install_view(joined, left);
        self.hub.broadcast(GcsEvent::View(view));
        Ok(())
    }

    fn get_write_concurrency(&self) -> u32 {
        self.write_concurrency.load(Ordering::SeqCst)
    }

    async fn set_write_concurrency(&self, n: u32) -> ConsensusResult<()> {
        self.write_concurrency.store(n, Ordering::SeqCst);
        Ok(())
    }

    fn get_protocol_version(&self) -> u32 {
        self.protocol_version.load(Ordering::SeqCst)
    }

    async fn set_protocol_version(&self, v: u32) -> ConsensusResult<()> {
        self.protocol_version.store(v, Ordering::SeqCst);
        Ok(())
    }

    async fn set_leader(&self, _id: MemberId) -> ConsensusResult<()> {
        Ok(())
    }

    async fn set_everyone_leader(&self) -> ConsensusResult<()> {
        Ok(())
    }

    fn get_leaders(&self) -> (Vec<MemberId>, Vec<MemberId>) {
        (Vec::new(), Vec::new())
    }
}
