// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hold-transactions Gate (spec.md §4.6), grounded exactly on
//! `hold_transactions.cc`'s semantics: a single boolean guarded by a
//! mutex+condvar, with a waiter that polls once per second rather than
//! parking on a single indefinite wait, so it can observe a killed
//! session or a local ERROR transition mid-wait without a second
//! notifier channel.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldGateError {
    TimedOut,
    Killed,
    MemberError,
}

/// Blocks new transactions on secondary appliers while a primary
/// election is in progress. Applier threads hold the gate open
/// (`enable`) until the new primary's backlog has been applied
/// (`disable`).
pub struct HoldTransactionsGate {
    applying_backlog: Mutex<bool>,
    condvar: Condvar,
}

impl Default for HoldTransactionsGate {
    fn default() -> Self {
        Self::new()
    }
}

impl HoldTransactionsGate {
    pub fn new() -> Self {
        Self {
            applying_backlog: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn enable(&self) {
        *self.applying_backlog.lock().unwrap() = true;
        debug!("hold-transactions gate enabled");
    }

    pub fn disable(&self) {
        *self.applying_backlog.lock().unwrap() = false;
        self.condvar.notify_all();
        debug!("hold-transactions gate disabled");
    }

    pub fn is_enabled(&self) -> bool {
        *self.applying_backlog.lock().unwrap()
    }

    /// Blocks the caller until the gate clears, `timeout` elapses, the
    /// caller observes `is_killed() == true`, or
    /// `is_member_error() == true`. Polls once per second so the killed
    /// and member-error predicates are re-evaluated even while no
    /// `disable()` notification arrives.
    pub fn wait_until_primary_failover_complete(
        &self,
        timeout: Duration,
        is_killed: impl Fn() -> bool,
        is_member_error: impl Fn() -> bool,
    ) -> Result<(), HoldGateError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.applying_backlog.lock().unwrap();
        loop {
            if !*guard {
                return Ok(());
            }
            if is_killed() {
                return Err(HoldGateError::Killed);
            }
            if is_member_error() {
                return Err(HoldGateError::MemberError);
            }
            let now = Instant::now();
            if now >= deadline {
                info!("hold-transactions gate wait timed out");
                return Err(HoldGateError::TimedOut);
            }
            let poll = (deadline - now).min(Duration::from_secs(1));
            let (g, _) = self.condvar.wait_timeout(guard, poll).unwrap();
            guard = g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_when_not_enabled() {
        let gate = HoldTransactionsGate::new();
        let result =
            gate.wait_until_primary_failover_complete(Duration::from_secs(5), || false, || false);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn wait_times_out_while_enabled() {
        let gate = HoldTransactionsGate::new();
        gate.enable();
        let result = gate.wait_until_primary_failover_complete(
            Duration::from_millis(50),
            || false,
            || false,
        );
        assert_eq!(result, Err(HoldGateError::TimedOut));
    }

    #[test]
    fn wait_unblocks_on_disable() {
        let gate = Arc::new(HoldTransactionsGate::new());
        gate.enable();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || {
                gate.wait_until_primary_failover_complete(
                    Duration::from_secs(10),
                    || false,
                    || false,
                )
            })
        };
        thread::sleep(Duration::from_millis(20));
        gate.disable();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn wait_reports_killed_session() {
        let gate = HoldTransactionsGate::new();
        gate.enable();
        let result = gate.wait_until_primary_failover_complete(
            Duration::from_secs(10),
            || true,
            || false,
        );
        assert_eq!(result, Err(HoldGateError::Killed));
    }

    #[test]
    fn wait_reports_member_error() {
        let gate = HoldTransactionsGate::new();
        gate.enable();
        let result = gate.wait_until_primary_failover_complete(
            Duration::from_secs(10),
            || false,
            || true,
        );
        assert_eq!(result, Err(HoldGateError::MemberError));
    }
}
