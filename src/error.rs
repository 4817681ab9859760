// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error kinds surfaced by the core, per spec.md §7.

use thiserror::Error;

use crate::view::MemberId;

pub type ConsensusResult<T> = Result<T, ConsensusError>;

#[derive(Error, Debug, Clone)]
pub enum ConsensusError {
    #[error("bad configuration: {0}")]
    Config(String),

    #[error("group communication error: {0}")]
    Communication(String),

    #[error("message exceeds fragment bound")]
    MessageTooBig,

    #[error("transaction was negatively certified")]
    CertificationNegative,

    #[error("GNO space exhausted for group; restart with a new group name")]
    CertificationExhausted,

    #[error("consistency wait timed out")]
    ConsistencyTimeout,

    #[error("local member {0:?} is in ERROR state")]
    MemberError(MemberId),

    #[error("no majority reachable")]
    Partition,

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl ConsensusError {
    /// Whether this error breaks a global invariant and should terminate
    /// this member's group membership (spec.md §7 propagation policy).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsensusError::CertificationExhausted
                | ConsensusError::MemberError(_)
                | ConsensusError::Internal(_)
        )
    }
}
