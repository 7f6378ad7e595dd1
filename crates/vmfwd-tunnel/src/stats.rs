//! Per-port session accounting.
//!
//! [`SessionCounter`] is an atomic counter of live sessions; every TCP
//! connection and UDP client session holds a [`SessionGuard`] for as long as
//! its task runs, so the count drops back as soon as the task is gone.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared between one forwarded port and its sessions.
#[derive(Debug, Default)]
pub struct PortStats {
    sessions: SessionCounter,
    truncated_datagrams: AtomicU64,
}

impl PortStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sessions(&self) -> &SessionCounter {
        &self.sessions
    }

    pub(crate) fn record_truncated(&self) {
        self.truncated_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    /// Datagrams that exceeded the read buffer and were forwarded truncated.
    pub fn truncated_datagrams(&self) -> u64 {
        self.truncated_datagrams.load(Ordering::Relaxed)
    }
}

/// Live and cumulative session counts.
#[derive(Debug, Default)]
pub struct SessionCounter {
    active: Arc<AtomicUsize>,
    total: AtomicU64,
}

impl SessionCounter {
    /// Count a new session. The returned guard is `Send` so it can move into
    /// the session's task; the session stays counted until the guard drops.
    pub fn acquire(&self) -> SessionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            counter: self.active.clone(),
        }
    }

    /// Sessions currently alive.
    ///
    /// `Relaxed` ordering: suitable for logging and tests, not for
    /// synchronisation.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Sessions ever started on this port.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// RAII guard that decrements the live-session count on drop.
#[derive(Debug)]
pub struct SessionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
