//! Process-local governance state.
//!
//! Idle clocks, exec counters and preview ports live in memory only. A
//! restart resets them: every session looks freshly active and regains its
//! full concurrency budget. Termination is the only durable governance
//! fact and lives with the session row.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::error::{GovernanceError, GovernanceResult};

#[derive(Debug, Default)]
pub struct GovernanceState {
    activity: DashMap<String, Instant>,
    exec_counters: DashMap<String, Arc<AtomicUsize>>,
    preview_ports: DashMap<String, u16>,
}

impl GovernanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time since the session's last successful governed operation.
    ///
    /// The first observation starts the clock and returns `None`.
    pub fn observe_idle(&self, session_id: &str) -> Option<Duration> {
        let mut fresh = false;
        let last = *self
            .activity
            .entry(session_id.to_string())
            .or_insert_with(|| {
                fresh = true;
                Instant::now()
            });
        if fresh { None } else { Some(last.elapsed()) }
    }

    /// Advance the idle clock.
    pub fn touch(&self, session_id: &str) {
        self.activity.insert(session_id.to_string(), Instant::now());
    }

    /// Reserve an exec slot, or fail immediately when `limit` are in flight.
    pub fn try_acquire_exec(&self, session_id: &str, limit: usize) -> GovernanceResult<ExecPermit> {
        let counter = self
            .exec_counters
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();

        let mut current = counter.load(Ordering::SeqCst);
        loop {
            if current >= limit {
                return Err(GovernanceError::ConcurrencyLimit {
                    in_flight: current,
                    limit,
                });
            }
            match counter.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        Ok(ExecPermit { counter })
    }

    /// Execs currently in flight for a session.
    pub fn in_flight(&self, session_id: &str) -> usize {
        self.exec_counters
            .get(session_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Register the preview port, replacing any previous one.
    pub fn set_preview_port(&self, session_id: &str, port: u16) {
        self.preview_ports.insert(session_id.to_string(), port);
    }

    pub fn preview_port(&self, session_id: &str) -> Option<u16> {
        self.preview_ports.get(session_id).map(|p| *p)
    }

    pub fn remove_preview_port(&self, session_id: &str) -> Option<u16> {
        self.preview_ports.remove(session_id).map(|(_, port)| port)
    }

    /// Whether any in-memory state exists for the session.
    pub fn is_tracked(&self, session_id: &str) -> bool {
        self.activity.contains_key(session_id)
            || self.exec_counters.contains_key(session_id)
            || self.preview_ports.contains_key(session_id)
    }

    /// Drop all in-memory state for a session.
    ///
    /// Outstanding permits keep their own counter handle and still release
    /// correctly.
    pub fn clear(&self, session_id: &str) {
        self.activity.remove(session_id);
        self.exec_counters.remove(session_id);
        self.preview_ports.remove(session_id);
    }
}

/// One reserved exec slot; released on drop, whatever the exit path.
#[derive(Debug)]
pub struct ExecPermit {
    counter: Arc<AtomicUsize>,
}

impl Drop for ExecPermit {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
