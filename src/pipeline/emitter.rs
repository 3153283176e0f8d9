//! Emitter: closed-window accumulators → published aggregates
//!
//! Each aggregate is published with bounded exponential backoff. Once the
//! retry budget is spent the aggregate goes to the dead-letter sink; it is
//! never merged back into state and never dropped without a report.

use super::error::{PipelineError, PipelineResult};
use super::metrics::EngineMetrics;
use super::codec::encode_aggregate;
use super::types::{Accumulator, AggregatedTrade, AggregationKey};
use super::windows::WindowId;
use crate::transport::{AggregatePublisher, DeadLetter, DeadLetterSink};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};

/// Retry knobs for publishing
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single publish call
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
#[error("Maximum retry attempts exceeded")]
pub struct MaxRetriesExceeded;

#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.base_delay, policy.max_delay, policy.max_retries)
    }

    /// Delay before the next retry: `initial * 2^attempt`, capped, plus up to 10% jitter
    pub fn next_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.current_attempt.min(16));
        let base = self.initial_delay.saturating_mul(factor).min(self.max_delay);

        let jitter_ms = (base.as_millis() / 10) as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };

        (base + jitter).min(self.max_delay.max(base))
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay = self.next_delay();

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_millis()
        );

        sleep(delay).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }
}

/// Outcome of emitting one closed window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub published: usize,
    pub dead_lettered: usize,
}

impl EmitReport {
    pub fn total(&self) -> usize {
        self.published + self.dead_lettered
    }
}

pub struct Emitter {
    publisher: Arc<dyn AggregatePublisher>,
    dead_letters: Arc<dyn DeadLetterSink>,
    policy: RetryPolicy,
    metrics: Arc<EngineMetrics>,
}

impl Emitter {
    pub fn new(
        publisher: Arc<dyn AggregatePublisher>,
        dead_letters: Arc<dyn DeadLetterSink>,
        policy: RetryPolicy,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            publisher,
            dead_letters,
            policy,
            metrics,
        }
    }

    /// Publish one aggregate, retrying per the policy
    pub async fn emit(
        &self,
        window: WindowId,
        key: &AggregationKey,
        accumulator: &Accumulator,
    ) -> PipelineResult<()> {
        let aggregate = AggregatedTrade::from_accumulator(window, key, accumulator);
        let record_key = aggregate.dedup_key();

        let payload = match encode_aggregate(&aggregate) {
            Ok(payload) => payload,
            Err(e) => {
                let fallback = format!("{:?}", aggregate);
                self.dead_letter(&record_key, fallback, e.to_string(), 0).await;
                return Err(e);
            }
        };

        let mut backoff = ExponentialBackoff::from_policy(&self.policy);

        loop {
            let reason = match timeout(
                self.policy.attempt_timeout,
                self.publisher.publish(&record_key, &payload),
            )
            .await
            {
                Ok(Ok(())) => {
                    self.metrics.record_emitted();
                    log::debug!(
                        "✅ Emitted {} window {} volume={}",
                        key,
                        window,
                        accumulator.total_volume
                    );
                    return Ok(());
                }
                Ok(Err(e)) => PipelineError::Publish(e.to_string()).to_string(),
                Err(_) => format!(
                    "publish timed out after {}ms",
                    self.policy.attempt_timeout.as_millis()
                ),
            };

            log::warn!("⚠️  Publish failed for {}: {}", record_key, reason);

            if backoff.sleep().await.is_err() {
                let attempts = backoff.attempts() + 1;
                let payload = String::from_utf8_lossy(&payload).into_owned();
                self.dead_letter(&record_key, payload, reason.clone(), attempts).await;
                return Err(PipelineError::RetriesExhausted { attempts, reason });
            }

            self.metrics.record_retry();
        }
    }

    /// Publish every accumulator of a closed window, in key order
    pub async fn emit_batch(
        &self,
        window: WindowId,
        entries: Vec<(AggregationKey, Accumulator)>,
    ) -> EmitReport {
        let mut report = EmitReport::default();

        for (key, accumulator) in &entries {
            match self.emit(window, key, accumulator).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    log::error!("❌ Aggregate {} for window {} not published: {}", key, window, e);
                    report.dead_lettered += 1;
                }
            }
        }

        report
    }

    pub async fn flush(&self) {
        if let Err(e) = self.publisher.flush().await {
            log::error!("❌ Failed to flush {} publisher: {}", self.publisher.backend_type(), e);
        }
        if let Err(e) = self.dead_letters.flush().await {
            log::error!("❌ Failed to flush dead-letter sink: {}", e);
        }
    }

    async fn dead_letter(&self, key: &str, payload: String, reason: String, attempts: u32) {
        self.metrics.record_dead_letter();

        let letter = DeadLetter {
            key: key.to_string(),
            payload,
            reason,
            attempts,
            failed_at: chrono::Utc::now(),
        };

        log::error!(
            "☠️  Dead-lettering {} after {} attempts: {}",
            letter.key,
            letter.attempts,
            letter.reason
        );

        if let Err(e) = self.dead_letters.report(letter.clone()).await {
            // Last resort: the full record goes to the error log
            log::error!("❌ Dead-letter sink failed ({}), record: {:?}", e, letter);
        }
    }
}
