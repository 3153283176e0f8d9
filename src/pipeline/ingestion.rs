//! Pipeline ingestion - dispatcher and key-partitioned workers
//!
//! The dispatcher pulls raw records from the source, decodes and validates
//! them, and routes each event to the worker that owns its key. Worker `i`
//! is the only writer into state shard `i`, so merges for one key are
//! serialized and applied in arrival order.
//!
//! Ingestion stops when the source is exhausted or shutdown is signalled.
//! Worker channels are then closed and every queued event is merged before
//! this function returns, so the caller can drain windows safely.

use super::engine::AggregationEngine;
use super::types::TradeEvent;
use crate::transport::TradeSource;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Counters for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub records_read: u64,
    pub events_routed: u64,
    pub events_merged: u64,
}

async fn ingestion_worker(
    id: usize,
    mut rx: mpsc::Receiver<TradeEvent>,
    engine: Arc<AggregationEngine>,
) -> u64 {
    let mut merged = 0u64;

    while let Some(event) = rx.recv().await {
        match engine.process_trade(&event) {
            Ok(_) => merged += 1,
            Err(e) if e.is_per_event() => {}
            Err(e) => log::error!("❌ Worker {} failed to merge event: {}", id, e),
        }
    }

    log::debug!("🧵 Worker {} stopped after {} merges", id, merged);
    merged
}

/// Run ingestion until the source ends or shutdown is signalled
///
/// Returns the source so the caller can commit it once the drained
/// aggregates have been emitted.
pub async fn start_pipeline_ingestion<S>(
    mut source: S,
    engine: Arc<AggregationEngine>,
    channel_buffer: usize,
    mut shutdown: watch::Receiver<bool>,
) -> (S, IngestionSummary)
where
    S: TradeSource,
{
    let worker_count = engine.store().shard_count();

    log::info!("🚀 Starting pipeline ingestion");
    log::info!("   ├─ Source: {}", source.source_type());
    log::info!("   ├─ Workers: {}", worker_count);
    log::info!("   └─ Channel buffer: {} events per worker", channel_buffer);

    let mut senders = Vec::with_capacity(worker_count);
    let mut workers: Vec<JoinHandle<u64>> = Vec::with_capacity(worker_count);

    for id in 0..worker_count {
        let (tx, rx) = mpsc::channel(channel_buffer.max(1));
        senders.push(tx);
        workers.push(tokio::spawn(ingestion_worker(id, rx, engine.clone())));
    }

    let mut summary = IngestionSummary::default();
    let mut window_count = 0u64;
    let mut last_log_time = Instant::now();

    if *shutdown.borrow() {
        log::warn!("⚠️  Shutdown already requested, not reading source");
    } else {
        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("🛑 Shutdown requested, no longer accepting events");
                        break;
                    }
                }

                record = source.next_record() => {
                    let record = match record {
                        Ok(Some(record)) => record,
                        Ok(None) => {
                            log::info!("📭 Source exhausted");
                            break;
                        }
                        Err(e) => {
                            log::error!("❌ Source read failed, stopping ingestion: {}", e);
                            break;
                        }
                    };

                    summary.records_read += 1;
                    window_count += 1;

                    // Per-event errors are counted and logged inside decode
                    let Ok(event) = engine.decode(&record.payload) else {
                        continue;
                    };

                    let worker = engine.route(&event);
                    if senders[worker].send(event).await.is_err() {
                        log::error!("❌ Worker {} is gone, stopping ingestion", worker);
                        break;
                    }
                    summary.events_routed += 1;

                    if last_log_time.elapsed().as_secs() >= 10 {
                        let rate = window_count as f64 / last_log_time.elapsed().as_secs_f64();
                        log::info!(
                            "📊 Ingestion rate: {:.1} records/sec (total: {})",
                            rate,
                            summary.records_read
                        );
                        last_log_time = Instant::now();
                        window_count = 0;
                    }
                }
            }
        }
    }

    // Closing the channels lets each worker finish its queue and exit
    drop(senders);

    for (id, worker) in workers.into_iter().enumerate() {
        match worker.await {
            Ok(merged) => summary.events_merged += merged,
            Err(e) => log::error!("❌ Worker {} panicked: {}", id, e),
        }
    }

    log::info!(
        "✅ Pipeline ingestion stopped: {} read, {} routed, {} merged",
        summary.records_read,
        summary.events_routed,
        summary.events_merged
    );

    (source, summary)
}
