//! Engine counters
//!
//! Lock-free counters shared by the workers, scheduler and emitter, plus a
//! periodic reporter that logs a one-line summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    events_received: AtomicU64,
    events_merged: AtomicU64,
    decode_errors: AtomicU64,
    validation_errors: AtomicU64,
    late_events: AtomicU64,
    windows_closed: AtomicU64,
    aggregates_emitted: AtomicU64,
    publish_retries: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_merged: u64,
    pub decode_errors: u64,
    pub validation_errors: u64,
    pub late_events: u64,
    pub windows_closed: u64,
    pub aggregates_emitted: u64,
    pub publish_retries: u64,
    pub dead_lettered: u64,
}

impl MetricsSnapshot {
    pub fn dropped_events(&self) -> u64 {
        self.decode_errors + self.validation_errors + self.late_events
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merged(&self) {
        self.events_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_error(&self) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_event(&self) {
        self.late_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_closed(&self) {
        self.windows_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.aggregates_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.publish_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_merged: self.events_merged.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            late_events: self.late_events.load(Ordering::Relaxed),
            windows_closed: self.windows_closed.load(Ordering::Relaxed),
            aggregates_emitted: self.aggregates_emitted.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        log::info!(
            "📊 received={} merged={} dropped={} (decode={} invalid={} late={}) | windows={} emitted={} retries={} dlq={}",
            s.events_received,
            s.events_merged,
            s.dropped_events(),
            s.decode_errors,
            s.validation_errors,
            s.late_events,
            s.windows_closed,
            s.aggregates_emitted,
            s.publish_retries,
            s.dead_lettered
        );
    }
}

/// Log a metrics summary every `interval_ms` until shutdown is signalled
pub async fn metrics_reporter_task(
    metrics: Arc<EngineMetrics>,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = interval(Duration::from_millis(interval_ms.max(1)));
    // First tick fires immediately
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => metrics.log_summary(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    metrics.log_summary();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = EngineMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_merged();
        metrics.record_validation_error();
        metrics.record_late_event();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_received, 2);
        assert_eq!(snapshot.events_merged, 1);
        assert_eq!(snapshot.dropped_events(), 2);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let metrics = Arc::new(EngineMetrics::new());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(metrics_reporter_task(metrics, 10, rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }
}
