//! Error taxonomy for the aggregation pipeline
//!
//! Per-event errors (`Decode`, `Validation`, `LateEvent`) are contained at the
//! worker that hit them. Publish errors are retried by the emitter. Only
//! configuration errors (see `config::ConfigError`) abort the process.

use super::windows::WindowId;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed inbound payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Well-formed payload that violates a field constraint
    #[error("validation error: {0}")]
    Validation(String),

    /// Merge targeted a window that has already been extracted
    #[error("late event for closed window {0}")]
    LateEvent(WindowId),

    /// Aggregate could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// Single publish attempt failed (retryable)
    #[error("publish error: {0}")]
    Publish(String),

    /// Publish kept failing after the configured number of retries
    #[error("publish retries exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PipelineError {
    /// Errors that drop a single event without affecting the worker
    pub fn is_per_event(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode(_) | PipelineError::Validation(_) | PipelineError::LateEvent(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
