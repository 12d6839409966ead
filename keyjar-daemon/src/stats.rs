//! Broker counters.
//!
//! Lock-free counters shared between request handling and the reaper, so
//! internal failure kinds stay distinguishable even though clients only see
//! a generic denial.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use keyjar_auth::session::RejectReason;

#[derive(Debug, Default)]
struct Counters {
    sessions_started: AtomicU64,
    completed: AtomicU64,
    authentication_failed: AtomicU64,
    unauthorized: AtomicU64,
    signing_failed: AtomicU64,
    expired: AtomicU64,
    duplicate_sessions: AtomicU64,
    reaper_restarts: AtomicU64,
}

/// Shared handle to the broker counters. Clones observe the same values.
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    inner: Arc<Counters>,
}

/// Point-in-time copy of [`BrokerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sessions_started: u64,
    pub completed: u64,
    pub authentication_failed: u64,
    pub unauthorized: u64,
    pub signing_failed: u64,
    pub expired: u64,
    pub duplicate_sessions: u64,
    pub reaper_restarts: u64,
}

impl StatsSnapshot {
    /// Sessions that reached a rejected state, whatever the reason.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.authentication_failed + self.unauthorized + self.signing_failed
    }
}

impl BrokerStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_started(&self) {
        self.inner.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejection by reason.
    pub fn record_rejected(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::AuthenticationFailed => &self.inner.authentication_failed,
            RejectReason::Unauthorized => &self.inner.unauthorized,
            RejectReason::SigningFailed => &self.inner.signing_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: u64) {
        self.inner.expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_duplicate_session(&self) {
        self.inner.duplicate_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reaper_restart(&self) {
        self.inner.reaper_restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_started: self.inner.sessions_started.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            authentication_failed: self.inner.authentication_failed.load(Ordering::Relaxed),
            unauthorized: self.inner.unauthorized.load(Ordering::Relaxed),
            signing_failed: self.inner.signing_failed.load(Ordering::Relaxed),
            expired: self.inner.expired.load(Ordering::Relaxed),
            duplicate_sessions: self.inner.duplicate_sessions.load(Ordering::Relaxed),
            reaper_restarts: self.inner.reaper_restarts.load(Ordering::Relaxed),
        }
    }
}
