//! Aggregation engine - per-event processing path
//!
//! ```text
//! raw bytes
//!     ↓
//! decode + validate + stamp arrival time        (dispatcher)
//!     ↓
//! AggregationKey::from_event                    (worker)
//!     ↓
//! lock key shard
//!     ├─ read clock, WindowAssigner::assign
//!     └─ merge into accumulator
//! ```
//!
//! The window is assigned from the clock read while the key's shard is
//! locked, not from the dispatcher stamp. An event that waited in a worker
//! queue while its window was extracted therefore joins the next window
//! instead of being dropped as late.
//!
//! Processing is synchronous and never blocks on emission. Per-event errors
//! are counted here and returned to the caller, which logs and moves on.

use super::codec::decode_event;
use super::error::{PipelineError, PipelineResult};
use super::metrics::EngineMetrics;
use super::state::{AggregationStateStore, MergeOutcome};
use super::types::{AggregationKey, TradeEvent};
use super::windows::{WindowAssigner, WindowId};
use std::sync::Arc;

/// Wall-clock source in epoch milliseconds
pub type NowFn = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_now() -> NowFn {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

pub struct AggregationEngine {
    assigner: Arc<dyn WindowAssigner>,
    store: Arc<AggregationStateStore>,
    metrics: Arc<EngineMetrics>,
    now_fn: NowFn,
}

impl AggregationEngine {
    /// Engine with a custom clock (used by tests for deterministic windows)
    pub fn new_with_timestamp_fn(
        assigner: Arc<dyn WindowAssigner>,
        shards: usize,
        now_fn: NowFn,
    ) -> Self {
        Self {
            assigner,
            store: Arc::new(AggregationStateStore::new(shards)),
            metrics: Arc::new(EngineMetrics::new()),
            now_fn,
        }
    }

    pub fn store(&self) -> Arc<AggregationStateStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    pub fn now_fn(&self) -> NowFn {
        self.now_fn.clone()
    }

    pub fn now(&self) -> i64 {
        (self.now_fn)()
    }

    pub fn window_for(&self, timestamp: i64) -> WindowId {
        self.assigner.assign(timestamp)
    }

    /// Worker index owning the key of `event`
    pub fn route(&self, event: &TradeEvent) -> usize {
        self.store.shard_for(&AggregationKey::from_event(event))
    }

    /// Decode and validate a raw record, stamping it with the current time
    pub fn decode(&self, payload: &[u8]) -> PipelineResult<TradeEvent> {
        self.metrics.record_received();

        decode_event(payload, self.now()).map_err(|e| {
            match &e {
                PipelineError::Decode(_) => self.metrics.record_decode_error(),
                PipelineError::Validation(_) => self.metrics.record_validation_error(),
                _ => {}
            }
            log::warn!("⚠️  Dropping inbound record: {}", e);
            e
        })
    }

    /// Assign a decoded event to its window and merge its volume
    pub fn process_trade(&self, event: &TradeEvent) -> PipelineResult<MergeOutcome> {
        let key = AggregationKey::from_event(event);

        let merged = self.store.merge_assigned(&key, event.volume, || {
            self.window_for(self.now().max(event.arrival_timestamp))
        });

        match merged {
            Ok((window, outcome)) => {
                self.metrics.record_merged();
                log::trace!(
                    "merged {} ({:?}) volume={} into {}",
                    key,
                    event.side(),
                    event.volume,
                    window
                );
                Ok(outcome)
            }
            Err(e @ PipelineError::LateEvent(_)) => {
                self.metrics.record_late_event();
                log::debug!("🕐 Dropping late event {}: {}", key, e);
                Err(e)
            }
            Err(e @ PipelineError::Validation(_)) => {
                self.metrics.record_validation_error();
                log::warn!("⚠️  Dropping event {}: {}", key, e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Full per-event path: decode, validate, key, assign, merge
    pub fn ingest(&self, payload: &[u8]) -> PipelineResult<MergeOutcome> {
        let event = self.decode(payload)?;
        self.process_trade(&event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::windows::TumblingWindowAssigner;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn engine_at(clock: Arc<AtomicI64>) -> AggregationEngine {
        let assigner = Arc::new(TumblingWindowAssigner::from_secs(20).unwrap());
        AggregationEngine::new_with_timestamp_fn(
            assigner,
            4,
            Arc::new(move || clock.load(Ordering::SeqCst)),
        )
    }

    fn trade(group: &str, price: &str, volume: i64, direction: &str) -> Vec<u8> {
        format!(
            r#"{{"groupId":"{}","price":{},"volume":{},"direction":"{}"}}"#,
            group, price, volume, direction
        )
        .into_bytes()
    }

    #[test]
    fn test_ingest_stamps_arrival_time() {
        let clock = Arc::new(AtomicI64::new(1_000));
        let engine = engine_at(clock.clone());

        let event = engine.decode(&trade("G1", "100.0", 10, "BUY")).unwrap();
        assert_eq!(event.arrival_timestamp, 1_000);

        clock.store(25_000, Ordering::SeqCst);
        engine.ingest(&trade("G1", "100.0", 3, "BUY")).unwrap();
        assert_eq!(engine.store().open_windows(), vec![WindowId::new(20_000, 40_000)]);
    }

    #[test]
    fn test_invalid_event_does_not_touch_state() {
        let clock = Arc::new(AtomicI64::new(1_000));
        let engine = engine_at(clock);

        engine.ingest(&trade("G1", "100.0", 10, "BUY")).unwrap();
        let err = engine.ingest(&trade("G1", "100.0", -1, "BUY")).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(engine.ingest(b"{broken").is_err());

        let key = AggregationKey::new("G1", Decimal::from_str("100.0").unwrap(), "BUY");
        let acc = engine.store().get(WindowId::new(0, 20_000), &key).unwrap();
        assert_eq!(acc.total_volume, 10);
        assert_eq!(acc.event_count, 1);

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.events_received, 3);
        assert_eq!(snapshot.events_merged, 1);
        assert_eq!(snapshot.validation_errors, 1);
        assert_eq!(snapshot.decode_errors, 1);
    }

    #[test]
    fn test_queued_event_joins_next_window_after_extraction() {
        // Test: stamped at 19.999s, merged after [0,20) was extracted -> lands in [20,40)
        let clock = Arc::new(AtomicI64::new(19_999));
        let engine = engine_at(clock.clone());

        let queued = engine.decode(&trade("G1", "100.0", 4, "BUY")).unwrap();
        clock.store(20_000, Ordering::SeqCst);
        assert!(engine.store().extract_and_purge(WindowId::new(0, 20_000)).is_empty());

        assert_eq!(engine.process_trade(&queued).unwrap(), MergeOutcome::Created);

        let key = AggregationKey::from_event(&queued);
        let acc = engine.store().get(WindowId::new(20_000, 40_000), &key).unwrap();
        assert_eq!(acc.total_volume, 4);
        assert_eq!(engine.metrics().snapshot().late_events, 0);
    }

    #[test]
    fn test_overflowing_total_counted_as_validation_error() {
        let engine = engine_at(Arc::new(AtomicI64::new(1_000)));

        engine.ingest(&trade("G1", "1", i64::MAX, "BUY")).unwrap();
        engine.ingest(&trade("G1", "1", i64::MAX, "BUY")).unwrap();
        let err = engine.ingest(&trade("G1", "1", 2, "BUY")).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.events_merged, 2);
        assert_eq!(snapshot.validation_errors, 1);

        let key = AggregationKey::new("G1", Decimal::from(1), "BUY");
        let acc = engine.store().get(WindowId::new(0, 20_000), &key).unwrap();
        assert_eq!(acc.total_volume, u64::MAX - 1);
    }

    #[test]
    fn test_late_event_counted_and_dropped() {
        // Test: window extracted before the clock reached its end (shutdown drain)
        let clock = Arc::new(AtomicI64::new(1_000));
        let engine = engine_at(clock);

        let event = engine.decode(&trade("G1", "100.0", 10, "BUY")).unwrap();
        engine.store().extract_and_purge(WindowId::new(0, 20_000));

        let err = engine.process_trade(&event).unwrap_err();
        assert!(matches!(err, PipelineError::LateEvent(_)));
        assert_eq!(engine.metrics().snapshot().late_events, 1);
        assert_eq!(engine.store().live_accumulators(), 0);
    }

    #[test]
    fn test_route_matches_store_shard() {
        let engine = engine_at(Arc::new(AtomicI64::new(0)));
        let event = engine.decode(&trade("G7", "1.25", 1, "SELL")).unwrap();
        let key = AggregationKey::from_event(&event);
        assert_eq!(engine.route(&event), engine.store().shard_for(&key));
    }
}
