//! # volflow
//!
//! Windowed keyed volume aggregation for trade streams.
//!
//! Trade events are decoded from a source, grouped by
//! `(groupId, price, direction)`, bucketed into tumbling processing-time
//! windows and emitted as one aggregate per key per window.
//!
//! - `pipeline` - the aggregation engine (windows, state, scheduler, emitter)
//! - `transport` - source / publisher / dead-letter collaborators

pub mod pipeline;
pub mod transport;
