//! Transport collaborators
//!
//! The aggregation engine only talks to these traits:
//! - `TradeSource` yields raw inbound records and commits consumed positions
//! - `AggregatePublisher` publishes encoded aggregates
//! - `DeadLetterSink` receives aggregates the emitter gave up on
//!
//! `jsonl` backs them with newline-delimited JSON files, `memory` with
//! in-process buffers for tests and embedding.

pub mod jsonl;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use jsonl::{JsonlDeadLetterSink, JsonlPublisher, JsonlSource};
pub use memory::{ChannelSource, MemoryDeadLetterSink, MemoryPublisher};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish rejected: {0}")]
    Rejected(String),
}

/// One raw inbound record with its source position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub offset: u64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait TradeSource: Send {
    /// Next raw record, `None` once the source is exhausted
    async fn next_record(&mut self) -> Result<Option<SourceRecord>, TransportError>;

    /// Mark everything handed out so far as consumed
    async fn commit(&mut self) -> Result<(), TransportError>;

    fn source_type(&self) -> &'static str;
}

#[async_trait]
pub trait AggregatePublisher: Send + Sync {
    /// Publish one encoded aggregate under `key`
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), TransportError>;

    async fn flush(&self) -> Result<(), TransportError>;

    fn backend_type(&self) -> &'static str;
}

/// Aggregate that could not be published, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub key: String,
    pub payload: String,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn report(&self, letter: DeadLetter) -> Result<(), TransportError>;

    async fn flush(&self) -> Result<(), TransportError>;
}
