//! Process-wide counters aggregated across sessions.

use crate::common::LinkStats;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::LazyLock;

/// Global metrics collector.
#[derive(Debug, Default)]
pub struct GlobalMetrics {
    /// Total sessions created.
    pub sessions_created: AtomicU64,
    /// Sessions not yet closed.
    pub active_sessions: AtomicUsize,
    /// Total bytes sent across all sessions.
    pub total_bytes_sent: AtomicU64,
    /// Total bytes received across all sessions.
    pub total_bytes_received: AtomicU64,
    /// Total datagrams sent.
    pub total_packets_sent: AtomicU64,
    /// Total datagrams received.
    pub total_packets_received: AtomicU64,
    /// Timeout-driven retransmissions.
    pub total_retransmissions: AtomicU64,
    /// Fast-resend retransmissions.
    pub total_fast_retransmissions: AtomicU64,
}

impl GlobalMetrics {
    /// Record a new session.
    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session teardown.
    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Fold one session's statistics into the totals.
    pub fn update_from_stats(&self, stats: &LinkStats) {
        self.total_bytes_sent.store(stats.bytes_sent, Ordering::Relaxed);
        self.total_bytes_received
            .store(stats.bytes_received, Ordering::Relaxed);
        self.total_packets_sent
            .store(stats.packets_sent, Ordering::Relaxed);
        self.total_packets_received
            .store(stats.packets_received, Ordering::Relaxed);
        self.total_retransmissions
            .store(stats.retransmissions, Ordering::Relaxed);
        self.total_fast_retransmissions
            .store(stats.fast_retransmissions, Ordering::Relaxed);
    }

    /// Current values at a point in time.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            total_packets_sent: self.total_packets_sent.load(Ordering::Relaxed),
            total_packets_received: self.total_packets_received.load(Ordering::Relaxed),
            total_retransmissions: self.total_retransmissions.load(Ordering::Relaxed),
            total_fast_retransmissions: self.total_fast_retransmissions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the global metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub active_sessions: usize,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_packets_sent: u64,
    pub total_packets_received: u64,
    pub total_retransmissions: u64,
    pub total_fast_retransmissions: u64,
}

impl MetricsSnapshot {
    /// Retransmitted fraction of all sent datagrams.
    pub fn retransmission_rate(&self) -> f64 {
        if self.total_packets_sent == 0 {
            0.0
        } else {
            (self.total_retransmissions + self.total_fast_retransmissions) as f64
                / self.total_packets_sent as f64
        }
    }
}

static GLOBAL_METRICS: LazyLock<GlobalMetrics> = LazyLock::new(GlobalMetrics::default);

/// Get the global metrics instance.
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}

/// Format a snapshot for human-readable display.
pub fn format_metrics(snapshot: &MetricsSnapshot) -> String {
    format!(
        "relink metrics:\n\
         sessions: {} created, {} active\n\
         traffic: {} bytes sent, {} bytes received\n\
         packets: {} sent, {} received\n\
         retransmissions: {} timeout, {} fast ({:.2}% of sent)",
        snapshot.sessions_created,
        snapshot.active_sessions,
        snapshot.total_bytes_sent,
        snapshot.total_bytes_received,
        snapshot.total_packets_sent,
        snapshot.total_packets_received,
        snapshot.total_retransmissions,
        snapshot.total_fast_retransmissions,
        snapshot.retransmission_rate() * 100.0,
    )
}
