// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! `Context` contains per-group configuration, the current membership view
//! and metrics shared by all components of this member. Mirrors the role
//! `consensus-core`'s `Context` plays for a consensus authority.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::metrics::{initialise_metrics, Metrics};
use crate::view::{GroupView, MemberId, MemberStatus, ViewErrorCode};

pub struct Context {
    /// This member's own identifier in the group.
    pub own_id: MemberId,
    /// Configuration of this member.
    pub config: Config,
    /// Metrics shared by every component.
    pub metrics: Arc<Metrics>,
    /// Current membership view. Replaced wholesale on each view change.
    view: RwLock<Arc<GroupView>>,
    /// Monotonically increasing; bumped once per installed view, used to
    /// detect stale in-flight rounds (certifier stable-set rounds,
    /// coordinator registrations) the way spec.md §4.3/§4.5 require.
    view_epoch: AtomicU64,
}

impl Context {
    pub fn new(own_id: MemberId, config: Config, registry: prometheus::Registry) -> Self {
        let metrics = initialise_metrics(registry);
        let view = Arc::new(GroupView {
            view_id: 0,
            members: Vec::new(),
            joined: Vec::new(),
            left: Vec::new(),
            error: ViewErrorCode::Ok,
        });
        Self {
            own_id,
            config,
            metrics,
            view: RwLock::new(view),
            view_epoch: AtomicU64::new(0),
        }
    }

    pub fn view(&self) -> Arc<GroupView> {
        self.view.read().clone()
    }

    pub fn install_view(&self, view: GroupView) -> u64 {
        *self.view.write() = Arc::new(view);
        self.view_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn view_epoch(&self) -> u64 {
        self.view_epoch.load(Ordering::SeqCst)
    }

    pub fn own_status(&self) -> Option<MemberStatus> {
        self.view()
            .members
            .iter()
            .find(|m| m.id == self.own_id)
            .map(|m| m.status)
    }

    pub fn is_own_online_or_recovering(&self) -> bool {
        matches!(
            self.own_status(),
            Some(MemberStatus::Online) | Some(MemberStatus::Recovering)
        )
    }

    /// Gated the same way tokio gates `test-util`: unit tests get it for
    /// free via `cfg(test)`, and `tests/`/`benches/` (separate compilation
    /// units, built without `cfg(test)`) opt in through the feature.
    #[cfg(any(test, feature = "test-util"))]
    pub fn new_for_test() -> Arc<Self> {
        use crate::metrics::test_metrics;
        let metrics = test_metrics();
        let view = Arc::new(GroupView {
            view_id: 0,
            members: Vec::new(),
            joined: Vec::new(),
            left: Vec::new(),
            error: ViewErrorCode::Ok,
        });
        Arc::new(Self {
            own_id: MemberId::from("member-0"),
            config: Config::default(),
            metrics,
            view: RwLock::new(view),
            view_epoch: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{Member, MemberRole};

    #[test]
    fn install_view_bumps_epoch() {
        let ctx = Context::new_for_test();
        assert_eq!(ctx.view_epoch(), 0);
        let mut m = Member::new("member-0", uuid::Uuid::nil(), "h", 1);
        m.status = MemberStatus::Online;
        m.role = MemberRole::Primary;
        ctx.install_view(GroupView {
            view_id: 1,
            members: vec![m],
            joined: vec!["member-0".into()],
            left: vec![],
            error: ViewErrorCode::Ok,
        });
        assert_eq!(ctx.view_epoch(), 1);
        assert!(ctx.is_own_online_or_recovering());
    }
}
