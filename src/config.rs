// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Recognized configuration options (spec.md §6).
//!
//! All fields should tolerate being set independently by each member
//! without affecting safety of the protocol, in the spirit of
//! `consensus_config::Parameters`'s own doc comment. NOTE: defaults should
//! make sense, so most operators should not need to specify any field.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConsensusError, ConsensusResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SslMode {
    Disabled,
    Required,
    VerifyCa,
    VerifyIdentity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStateAction {
    ReadOnly,
    AbortServer,
    OfflineMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControlMode {
    Disabled,
    Quota,
}

/// Operational configuration of this replication core. Mirrors every row
/// of spec.md's configuration table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Identity of the group sid.
    pub group_name: Uuid,
    pub start_on_boot: bool,
    pub local_address: String,
    pub group_seeds: Vec<String>,
    pub bootstrap_group: bool,
    pub single_primary_mode: bool,
    pub enforce_update_everywhere_checks: bool,
    /// GNO allocation policy. `<= 1` means sequential allocation;
    /// `> 1` reserves per-member blocks of this size.
    pub gtid_assignment_block_size: i64,
    pub transaction_size_limit: usize,
    pub compression_threshold: usize,
    pub communication_max_message_size: usize,
    pub ssl_mode: SslMode,
    pub ip_allowlist: Vec<String>,
    pub member_expel_timeout: Duration,
    pub member_weight: u32,
    pub autorejoin_tries: u32,
    pub unreachable_majority_timeout: Duration,
    pub exit_state_action: ExitStateAction,
    pub flow_control_mode: FlowControlMode,
    pub flow_control_period: Duration,
    /// sid used for view-change markers.
    pub view_change_uuid: Uuid,
    pub paxos_single_leader: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group_name: Uuid::new_v4(),
            start_on_boot: false,
            local_address: "127.0.0.1:0".to_string(),
            group_seeds: Vec::new(),
            bootstrap_group: false,
            single_primary_mode: true,
            enforce_update_everywhere_checks: false,
            gtid_assignment_block_size: 1,
            transaction_size_limit: 150 * 1024 * 1024,
            compression_threshold: 1_000_000,
            communication_max_message_size: 10 * 1024 * 1024,
            ssl_mode: SslMode::Disabled,
            ip_allowlist: vec!["AUTOMATIC".to_string()],
            member_expel_timeout: Duration::from_secs(0),
            member_weight: 50,
            autorejoin_tries: 0,
            unreachable_majority_timeout: Duration::from_secs(0),
            exit_state_action: ExitStateAction::ReadOnly,
            flow_control_mode: FlowControlMode::Quota,
            flow_control_period: Duration::from_secs(1),
            view_change_uuid: Uuid::nil(),
            paxos_single_leader: false,
        }
    }
}

impl Config {
    /// Refuses to start on an inconsistent configuration, per spec.md §7
    /// ("CONFIG — bad option value or inconsistent combination").
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.gtid_assignment_block_size < 1 {
            return Err(ConsensusError::Config(
                "gtid_assignment_block_size must be >= 1".to_string(),
            ));
        }
        if self.bootstrap_group && !self.group_seeds.is_empty() {
            return Err(ConsensusError::Config(
                "bootstrap_group cannot be combined with group_seeds".to_string(),
            ));
        }
        if self.single_primary_mode && self.enforce_update_everywhere_checks {
            return Err(ConsensusError::Config(
                "enforce_update_everywhere_checks only applies in multi-primary mode".to_string(),
            ));
        }
        Ok(())
    }
}

/// One action in the member-actions configuration (spec.md §6, the only
/// state the core persists outside the binlog).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionEvent {
    AfterPrimaryElection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemberAction {
    pub action_name: String,
    pub event: ActionEvent,
    pub enabled: bool,
}

/// Serialized record of configured member actions, exchanged between
/// members on join, and force-overridable by any one member.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemberActionsConfig {
    actions: Vec<MemberAction>,
}

impl MemberActionsConfig {
    pub fn actions(&self) -> &[MemberAction] {
        &self.actions
    }

    pub fn enabled_for(&self, event: ActionEvent) -> impl Iterator<Item = &MemberAction> {
        self.actions
            .iter()
            .filter(move |a| a.enabled && a.event == event)
    }

    /// Overwrites the whole configuration with `actions`. Any one member
    /// can force this, per spec.md §6.
    pub fn replace_all_actions(&mut self, actions: Vec<MemberAction>) {
        self.actions = actions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_block_size_rejected() {
        let mut cfg = Config::default();
        cfg.gtid_assignment_block_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bootstrap_with_seeds_rejected() {
        let mut cfg = Config::default();
        cfg.bootstrap_group = true;
        cfg.group_seeds = vec!["1.2.3.4:3306".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn member_actions_replace_all() {
        let mut cfg = MemberActionsConfig::default();
        cfg.replace_all_actions(vec![MemberAction {
            action_name: "promote_to_primary".to_string(),
            event: ActionEvent::AfterPrimaryElection,
            enabled: true,
        }]);
        assert_eq!(cfg.enabled_for(ActionEvent::AfterPrimaryElection).count(), 1);
    }
}
