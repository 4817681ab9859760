// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Group view and member data model (spec.md §3 "Group View" / "Member").

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable opaque identifier for a member, as handed out by the group
/// communication engine. Immutable for the member's lifetime in the view.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        MemberId(s.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    Primary,
    Secondary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    Online,
    Recovering,
    Error,
    Offline,
}

/// One member of the group. Role and status are mutable by group events;
/// identifiers are immutable for the lifetime of the member in the view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub server_uuid: uuid::Uuid,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub capability_version: u32,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, server_uuid: uuid::Uuid, host: &str, port: u16) -> Self {
        Self {
            id: id.into(),
            server_uuid,
            host: host.to_string(),
            port,
            weight: 50,
            role: MemberRole::Secondary,
            status: MemberStatus::Recovering,
            capability_version: 1,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, MemberStatus::Online)
    }

    pub fn is_online_or_recovering(&self) -> bool {
        matches!(self.status, MemberStatus::Online | MemberStatus::Recovering)
    }
}

pub type ViewId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewErrorCode {
    Ok,
    MemberExpelled,
}

/// A monotonically numbered snapshot of group membership, delivered exactly
/// once in total order to all surviving members (spec.md §3 "Group View").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupView {
    pub view_id: ViewId,
    pub members: Vec<Member>,
    pub joined: Vec<MemberId>,
    pub left: Vec<MemberId>,
    pub error: ViewErrorCode,
}

impl GroupView {
    pub fn member_ids(&self) -> BTreeSet<MemberId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    pub fn online_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_online())
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.members.iter().any(|m| &m.id == id)
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }
}
