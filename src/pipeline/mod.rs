//! # Windowed keyed aggregation engine
//!
//! Trade events are grouped by `(groupId, price, direction)` and their volume
//! is summed over tumbling processing-time windows. One aggregate per key per
//! window is emitted once the window closes.
//!
//! ## Flow
//!
//! ```text
//! TradeSource → decode/validate → route by key hash → worker
//!     ↓
//! WindowAssigner::assign(arrival time)
//!     ↓
//! AggregationStateStore::merge
//!     ↓  (wall clock passes window end)
//! WindowScheduler::fire_closed → extract_and_purge
//!     ↓
//! Emitter (retry + backoff) → AggregatePublisher
//!                           ↘ DeadLetterSink (retries exhausted)
//! ```
//!
//! ## Guarantees
//!
//! - at most one accumulator per `(window, key)`
//! - each window is extracted exactly once; later merges are rejected as late
//! - windows close in increasing end order
//! - on shutdown every open window is closed and emitted before exit
//!
//! State is in-memory only. After a crash, recovery is replay from the
//! source's last committed position.
//!
//! ## Module Organization
//!
//! - `types` - trade events, keys, accumulators, aggregate records
//! - `windows` - window ids and the tumbling assigner
//! - `state` - sharded accumulator store
//! - `scheduler` - window lifecycle and closure ticks
//! - `emitter` - publishing with retry and dead letters
//! - `engine` - per-event processing path
//! - `ingestion` - dispatcher and key-partitioned workers
//! - `runtime` - end-to-end wiring and shutdown drain
//! - `codec` - fixed-schema JSON codec
//! - `config` - environment configuration
//! - `metrics` - counters and periodic summaries
//! - `error` - error taxonomy

pub mod codec;
pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod metrics;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig};
pub use emitter::{EmitReport, Emitter, RetryPolicy};
pub use engine::{AggregationEngine, NowFn};
pub use error::{PipelineError, PipelineResult};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use runtime::{PipelineRuntime, RunSummary};
pub use scheduler::{WindowScheduler, WindowState};
pub use state::{AggregationStateStore, MergeOutcome};
pub use types::{Accumulator, AggregatedTrade, AggregationKey, TradeDirection, TradeEvent};
pub use windows::{TumblingWindowAssigner, WindowAssigner, WindowId};
