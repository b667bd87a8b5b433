//! Process-local counters exposed through the `/metrics` endpoint.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters shared by the broker and orchestrator.
#[derive(Debug, Default)]
pub struct HubMetrics {
    events_routed: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    publish_failures: AtomicU64,
    active_subscriptions: AtomicI64,
    queue_depth_max: AtomicU64,
}

impl HubMetrics {
    /// Creates a zeroed metrics set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one event accepted for routing.
    pub fn record_routed(&self) {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one successful delivery to a subscriber queue.
    pub fn record_delivery(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one delivery dropped on timeout or a closed queue.
    pub fn record_drop(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one failed publish RPC issued by the orchestrator.
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Notes a subscription stream opening.
    pub fn subscription_opened(&self) {
        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Notes a subscription stream closing.
    pub fn subscription_closed(&self) {
        self.active_subscriptions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records the depth of a subscriber queue at delivery time; the
    /// high-water mark is exported.
    pub fn observe_queue_depth(&self, depth: u64) {
        self.queue_depth_max.fetch_max(depth, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_routed: self.events_routed.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
            queue_depth_max: self.queue_depth_max.load(Ordering::Relaxed),
        }
    }

    /// Renders the counters in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        let _ = writeln!(out, "# TYPE agenthub_events_routed_total counter");
        let _ = writeln!(out, "agenthub_events_routed_total {}", snapshot.events_routed);
        let _ = writeln!(out, "# TYPE agenthub_events_delivered_total counter");
        let _ = writeln!(
            out,
            "agenthub_events_delivered_total {}",
            snapshot.events_delivered
        );
        let _ = writeln!(out, "# TYPE agenthub_events_dropped_total counter");
        let _ = writeln!(
            out,
            "agenthub_events_dropped_total {}",
            snapshot.events_dropped
        );
        let _ = writeln!(out, "# TYPE agenthub_publish_failures_total counter");
        let _ = writeln!(
            out,
            "agenthub_publish_failures_total {}",
            snapshot.publish_failures
        );
        let _ = writeln!(out, "# TYPE agenthub_active_subscriptions gauge");
        let _ = writeln!(
            out,
            "agenthub_active_subscriptions {}",
            snapshot.active_subscriptions
        );
        let _ = writeln!(out, "# TYPE agenthub_queue_depth_max gauge");
        let _ = writeln!(out, "agenthub_queue_depth_max {}", snapshot.queue_depth_max);
        out
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events accepted for routing.
    pub events_routed: u64,
    /// Deliveries that reached a subscriber queue.
    pub events_delivered: u64,
    /// Deliveries dropped on timeout or closed queue.
    pub events_dropped: u64,
    /// Publish RPCs that failed.
    pub publish_failures: u64,
    /// Currently open subscription streams.
    pub active_subscriptions: i64,
    /// Deepest subscriber queue observed at delivery time.
    pub queue_depth_max: u64,
}
