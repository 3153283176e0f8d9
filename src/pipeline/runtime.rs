//! Pipeline runtime - wires ingestion, scheduler, emitter and metrics
//!
//! Shutdown sequence (on signal or when the source is exhausted):
//! 1. stop reading the source, let workers merge their queued events
//! 2. stop the scheduler tick loop
//! 3. close every open window and emit it
//! 4. flush publisher and dead-letter sink, then commit the source
//!
//! A failed commit is returned as `PipelineError::Transport`: the aggregates
//! are already published, but the next run will replay the uncommitted input.

use super::config::{ConfigError, PipelineConfig};
use super::emitter::{Emitter, RetryPolicy};
use super::engine::{system_now, AggregationEngine, NowFn};
use super::error::PipelineResult;
use super::ingestion::{start_pipeline_ingestion, IngestionSummary};
use super::metrics::{metrics_reporter_task, MetricsSnapshot};
use super::scheduler::{window_scheduler_task, WindowScheduler};
use super::windows::TumblingWindowAssigner;
use crate::transport::{AggregatePublisher, DeadLetterSink, TradeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What a completed run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ingestion: IngestionSummary,
    pub drained_windows: usize,
    pub metrics: MetricsSnapshot,
}

pub struct PipelineRuntime {
    config: PipelineConfig,
    engine: Arc<AggregationEngine>,
    emitter: Arc<Emitter>,
}

impl PipelineRuntime {
    pub fn new(
        config: PipelineConfig,
        publisher: Arc<dyn AggregatePublisher>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self, ConfigError> {
        Self::new_with_timestamp_fn(config, publisher, dead_letters, system_now())
    }

    pub fn new_with_timestamp_fn(
        config: PipelineConfig,
        publisher: Arc<dyn AggregatePublisher>,
        dead_letters: Arc<dyn DeadLetterSink>,
        now_fn: NowFn,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let assigner = TumblingWindowAssigner::new(config.window_length())?;
        let engine = Arc::new(AggregationEngine::new_with_timestamp_fn(
            Arc::new(assigner),
            config.workers,
            now_fn,
        ));

        let policy = RetryPolicy {
            max_retries: config.emit_max_retries,
            base_delay: Duration::from_millis(config.emit_backoff_base_ms),
            max_delay: Duration::from_millis(config.emit_max_backoff_ms),
            attempt_timeout: Duration::from_millis(config.emit_publish_timeout_ms),
        };

        let emitter = Arc::new(Emitter::new(publisher, dead_letters, policy, engine.metrics()));

        Ok(Self {
            config,
            engine,
            emitter,
        })
    }

    pub fn engine(&self) -> Arc<AggregationEngine> {
        self.engine.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run until the source is exhausted or `shutdown` flips to `true`
    pub async fn run<S>(
        &self,
        source: S,
        shutdown: watch::Receiver<bool>,
    ) -> PipelineResult<RunSummary>
    where
        S: TradeSource + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let scheduler = WindowScheduler::new(
            self.engine.store(),
            self.emitter.clone(),
            self.engine.metrics(),
        );
        let scheduler_handle = tokio::spawn(window_scheduler_task(
            scheduler,
            self.engine.now_fn(),
            self.config.tick_interval(),
            stop_rx.clone(),
        ));

        let reporter_handle = tokio::spawn(metrics_reporter_task(
            self.engine.metrics(),
            self.config.metrics_log_interval_ms,
            stop_rx,
        ));

        let (mut source, ingestion) = start_pipeline_ingestion(
            source,
            self.engine.clone(),
            self.config.channel_buffer,
            shutdown,
        )
        .await;

        let _ = stop_tx.send(true);

        let mut scheduler = match scheduler_handle.await {
            Ok(scheduler) => scheduler,
            Err(e) => {
                log::error!("❌ Scheduler task failed: {}, draining with a fresh scheduler", e);
                WindowScheduler::new(self.engine.store(), self.emitter.clone(), self.engine.metrics())
            }
        };

        let drained = scheduler.drain().await;
        log::info!("✅ Drained {} windows", drained.len());

        let committed = source.commit().await;

        if let Err(e) = reporter_handle.await {
            log::error!("❌ Metrics reporter failed: {}", e);
        }

        if let Err(e) = committed {
            log::error!("❌ Failed to commit {} source: {}", source.source_type(), e);
            return Err(e.into());
        }

        Ok(RunSummary {
            ingestion,
            drained_windows: drained.len(),
            metrics: self.engine.metrics().snapshot(),
        })
    }
}
