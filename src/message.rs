// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! View/Message Plumbing (spec.md §4.2): typed, totally-ordered messages
//! carried by the [`crate::gcs`] adapter. Wire framing is little-endian and
//! encoded with `bcs`, the way `consensus-core::block` encodes `Block`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::coordinator::ConsistencyLevel;
use crate::gtid::{Gno, GtidSet, Sid};
use crate::view::MemberId;

/// Protocol-level tag carried in every message's common header
/// (spec.md §6: `(cargo_type, protocol_version, payload_length)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CargoType {
    Transaction,
    CertifierData,
    ViewChangeMarker,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageHeader {
    pub cargo_type: CargoType,
    pub protocol_version: u32,
    pub payload_length: u32,
}

/// One opaque, originator-produced blob: the transaction-context log
/// event + GTID log event + binlog cache (spec.md §6 `PIT_TRANSACTION_DATA`).
/// The core never parses this; it is handed to the external applier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionData {
    pub originator: MemberId,
    pub specified_gtid: Option<(Sid, Gno)>,
    pub write_set: Vec<Vec<u8>>,
    pub snapshot_version: GtidSet,
    pub consistency_level: ConsistencyLevel,
    pub opaque_payload: Bytes,
}

/// A member's own `group_gtid_executed`, broadcast periodically by the
/// Broadcast/GC thread (spec.md §6 `PIT_GTID_EXECUTED`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CertifierGcData {
    pub member: MemberId,
    pub executed: GtidSet,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncBeforeExecution {
    pub thread_id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrepareAck {
    pub sid: Sid,
    pub gno: Gno,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewChangeMarker {
    pub sid: Sid,
    pub gno: Gno,
}

/// Typed payload body of one ordered message. Unknown variants (future
/// protocol versions) decode to [`Payload::Unknown`] and are ignored with
/// a warning rather than rejected, per spec.md §4.2.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Payload {
    Transaction(TransactionData),
    CertifierGc(CertifierGcData),
    SyncBeforeExecution(SyncBeforeExecution),
    PrepareAck(PrepareAck),
    ViewChangeMarker(ViewChangeMarker),
    MemberActions(crate::config::MemberActionsConfig),
    Unknown { type_code: u16, body: Bytes },
}

impl Payload {
    pub fn type_code(&self) -> u16 {
        match self {
            Payload::Transaction(_) => 1,
            Payload::CertifierGc(_) => 2,
            Payload::SyncBeforeExecution(_) => 3,
            Payload::PrepareAck(_) => 4,
            Payload::ViewChangeMarker(_) => 5,
            Payload::MemberActions(_) => 6,
            Payload::Unknown { type_code, .. } => *type_code,
        }
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(bcs::to_bytes(self).expect("payload serialization should not fail"))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bcs::Error> {
        bcs::from_bytes(bytes)
    }
}

/// One ordered message as delivered by the adapter: a header plus its
/// decoded payload and the sender's member id.
#[derive(Clone, Debug)]
pub struct OrderedMessage {
    pub header: MessageHeader,
    pub sender: MemberId,
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrips_through_bcs() {
        let original = Payload::PrepareAck(PrepareAck {
            sid: uuid::Uuid::nil(),
            gno: 7,
        });
        let encoded = original.encode();
        let decoded = Payload::decode(&encoded).unwrap();
        match decoded {
            Payload::PrepareAck(ack) => assert_eq!(ack.gno, 7),
            _ => panic!("wrong variant"),
        }
    }
}
