//! Observability and Metrics
//!
//! Counters for connection, authentication and packet activity.
//!
//! Each plugin instance owns its own [`Metrics`]; there is no process-wide
//! collector. Uses atomic counters so any task can record without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for one plugin instance
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Total auth exchanges attempted
    pub auth_attempts: AtomicU64,
    /// Accounts registered on first auth
    pub auth_registered: AtomicU64,
    /// Auth exchanges accepted against a stored hash
    pub auth_accepted: AtomicU64,
    /// Auth exchanges rejected (wrong token or store failure)
    pub auth_rejected: AtomicU64,
    /// Frames received after auth
    pub frames_received: AtomicU64,
    /// Prepares passed to the local handler
    pub prepares_handled: AtomicU64,
    /// Prepares the local handler fulfilled
    pub prepares_fulfilled: AtomicU64,
    /// Reject packets built locally from errors
    pub rejects_synthesized: AtomicU64,
    /// Outbound calls issued
    pub calls_total: AtomicU64,
    /// Outbound calls that hit their deadline
    pub calls_timed_out: AtomicU64,
    /// Outbound calls failed by a disconnect or send failure
    pub calls_disconnected: AtomicU64,
    /// Malformed or unexpected frames
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            auth_attempts: AtomicU64::new(0),
            auth_registered: AtomicU64::new(0),
            auth_accepted: AtomicU64::new(0),
            auth_rejected: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            prepares_handled: AtomicU64::new(0),
            prepares_fulfilled: AtomicU64::new(0),
            rejects_synthesized: AtomicU64::new(0),
            calls_total: AtomicU64::new(0),
            calls_timed_out: AtomicU64::new(0),
            calls_disconnected: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn auth_attempt(&self) {
        self.auth_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_registered(&self) {
        self.auth_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_accepted(&self) {
        self.auth_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_rejected(&self) {
        self.auth_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn prepare_handled(&self) {
        self.prepares_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn prepare_fulfilled(&self) {
        self.prepares_fulfilled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reject_synthesized(&self) {
        self.rejects_synthesized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_started(&self) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_timed_out(&self) {
        self.calls_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_disconnected(&self) {
        self.calls_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            auth_attempts: self.auth_attempts.load(Ordering::Relaxed),
            auth_registered: self.auth_registered.load(Ordering::Relaxed),
            auth_accepted: self.auth_accepted.load(Ordering::Relaxed),
            auth_rejected: self.auth_rejected.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            prepares_handled: self.prepares_handled.load(Ordering::Relaxed),
            prepares_fulfilled: self.prepares_fulfilled.load(Ordering::Relaxed),
            rejects_synthesized: self.rejects_synthesized.load(Ordering::Relaxed),
            calls_total: self.calls_total.load(Ordering::Relaxed),
            calls_timed_out: self.calls_timed_out.load(Ordering::Relaxed),
            calls_disconnected: self.calls_disconnected.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            auth_attempts = snapshot.auth_attempts,
            auth_registered = snapshot.auth_registered,
            auth_accepted = snapshot.auth_accepted,
            auth_rejected = snapshot.auth_rejected,
            frames_received = snapshot.frames_received,
            prepares_handled = snapshot.prepares_handled,
            prepares_fulfilled = snapshot.prepares_fulfilled,
            rejects_synthesized = snapshot.rejects_synthesized,
            calls_total = snapshot.calls_total,
            calls_timed_out = snapshot.calls_timed_out,
            calls_disconnected = snapshot.calls_disconnected,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Plugin metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub auth_attempts: u64,
    pub auth_registered: u64,
    pub auth_accepted: u64,
    pub auth_rejected: u64,
    pub frames_received: u64,
    pub prepares_handled: u64,
    pub prepares_fulfilled: u64,
    pub rejects_synthesized: u64,
    pub calls_total: u64,
    pub calls_timed_out: u64,
    pub calls_disconnected: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.connections_active, 1);
    }

    #[test]
    fn test_auth_counters() {
        let metrics = Metrics::default();
        metrics.auth_attempt();
        metrics.auth_registered();
        metrics.auth_attempt();
        metrics.auth_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.auth_attempts, 2);
        assert_eq!(snapshot.auth_registered, 1);
        assert_eq!(snapshot.auth_rejected, 1);
        assert_eq!(snapshot.auth_accepted, 0);
    }
}
