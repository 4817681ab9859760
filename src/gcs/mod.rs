// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! GCS Adapter (spec.md §4.1): a uniform façade over the group
//! communication engine. The engine itself — total-order multicast,
//! failure detector, view installer — is an external collaborator and out
//! of scope (spec.md §1); this module only specifies the boundary.

pub mod local;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::ConsensusResult;
use crate::message::{OrderedMessage, Payload};
use crate::view::{GroupView, MemberId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    Nok,
    TooBig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    NowLeaving,
    AlreadyLeaving,
    AlreadyLeft,
    Error,
}

/// One event delivered to a joined member: either an ordered message or a
/// view change. Channels are the idiomatic Rust stand-in for the
/// listener-object callbacks (`comm_listener`/`view_notifier`) of the
/// original GCS API.
#[derive(Clone, Debug)]
pub enum GcsEvent {
    Message(OrderedMessage),
    View(GroupView),
}

/// Unsafe recovery path: replace the view membership outright. Only valid
/// when a majority is unreachable (spec.md §4.1).
#[derive(Clone, Debug)]
pub struct ForceMembersSpec {
    pub members: Vec<MemberId>,
}

#[async_trait]
pub trait GcsAdapter: Send + Sync {
    /// Joins the group. Returns the event receiver the caller should poll
    /// for ordered messages and view changes; the join outcome itself is
    /// delivered asynchronously as the first view change, per spec.md §4.1.
    async fn join(&self, own_id: MemberId) -> ConsensusResult<UnboundedReceiver<GcsEvent>>;

    async fn leave(&self) -> ConsensusResult<LeaveOutcome>;

    /// Broadcasts `payload` to every member of the view that includes the
    /// sender, in the same total order as every other OK-sent message.
    async fn send_message(
        &self,
        payload: Payload,
        skip_if_not_initialized: bool,
    ) -> ConsensusResult<SendOutcome>;

    /// Unsafe recovery path, only valid when majority is unreachable.
    async fn force_members(&self, spec: ForceMembersSpec) -> ConsensusResult<()>;

    fn get_write_concurrency(&self) -> u32;
    async fn set_write_concurrency(&self, n: u32) -> ConsensusResult<()>;

    fn get_protocol_version(&self) -> u32;
    async fn set_protocol_version(&self, v: u32) -> ConsensusResult<()>;

    async fn set_leader(&self, id: MemberId) -> ConsensusResult<()>;
    async fn set_everyone_leader(&self) -> ConsensusResult<()>;
    /// Returns (preferred, actual) consensus leader sets.
    fn get_leaders(&self) -> (Vec<MemberId>, Vec<MemberId>);
}
