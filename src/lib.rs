// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Replication core: a deterministic certifier plus a transaction
//! consistency coordinator, sitting atop a totally-ordered group
//! communication primitive. See `SPEC_FULL.md` for the full design.

pub mod broadcaster;
pub mod certifier;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod gcs;
pub mod gtid;
pub mod hold_gate;
pub mod message;
pub mod metrics;
pub mod observer;
pub mod view;

pub use certifier::Certifier;
pub use config::Config;
pub use context::Context;
pub use coordinator::Coordinator;
pub use engine::Engine;
pub use error::{ConsensusError, ConsensusResult};
pub use gtid::{Gno, Gtid, GtidSet, Sid};
pub use view::{GroupView, Member, MemberId};
