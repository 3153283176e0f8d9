//! Core data types: trade events, aggregation keys and aggregate records

use super::error::{PipelineError, PipelineResult};
use super::windows::WindowId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade side as far as the pipeline cares
///
/// The raw direction string is always preserved verbatim in the key;
/// this classification is only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
    Other,
}

impl TradeDirection {
    pub fn classify(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("buy") {
            TradeDirection::Buy
        } else if raw.eq_ignore_ascii_case("sell") {
            TradeDirection::Sell
        } else {
            TradeDirection::Other
        }
    }
}

/// Validated inbound trade
///
/// `arrival_timestamp` is stamped by the engine when the record is decoded
/// (epoch millis), it is never taken from the payload. The window is assigned
/// at merge time from the clock, never earlier than this stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub group_id: String,
    pub price: Decimal,
    pub direction: String,
    pub volume: u64,
    pub arrival_timestamp: i64,
}

impl TradeEvent {
    pub fn side(&self) -> TradeDirection {
        TradeDirection::classify(&self.direction)
    }
}

/// Composite grouping key `(group_id, price, direction)`
///
/// Price equality is exact decimal equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    pub group_id: String,
    pub price: Decimal,
    pub direction: String,
}

impl AggregationKey {
    pub fn new(group_id: impl Into<String>, price: Decimal, direction: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            price,
            direction: direction.into(),
        }
    }

    pub fn from_event(event: &TradeEvent) -> Self {
        Self {
            group_id: event.group_id.clone(),
            price: event.price,
            direction: event.direction.clone(),
        }
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.group_id, self.price, self.direction)
    }
}

/// Running aggregate for one key within one window
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub total_volume: u64,
    pub representative_price: Decimal,
    pub representative_direction: String,
    pub event_count: u64,
}

impl Accumulator {
    pub fn new(key: &AggregationKey, volume: u64) -> Self {
        Self {
            total_volume: volume,
            representative_price: key.price,
            representative_direction: key.direction.clone(),
            event_count: 1,
        }
    }

    /// Add one event's volume; an overflowing total leaves the accumulator unchanged
    pub fn add(&mut self, volume: u64) -> PipelineResult<()> {
        self.total_volume = self.total_volume.checked_add(volume).ok_or_else(|| {
            PipelineError::Validation(format!(
                "total volume overflow: {} + {}",
                self.total_volume, volume
            ))
        })?;
        self.event_count += 1;
        Ok(())
    }
}

/// Output record, one per key per closed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTrade {
    pub group_id: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub price: Decimal,
    pub direction: String,
    pub total_volume: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub event_count: u64,
}

impl AggregatedTrade {
    pub fn from_accumulator(window: WindowId, key: &AggregationKey, acc: &Accumulator) -> Self {
        Self {
            group_id: key.group_id.clone(),
            price: acc.representative_price,
            direction: acc.representative_direction.clone(),
            total_volume: acc.total_volume,
            window_start: window.start_time(),
            window_end: window.end_time(),
            event_count: acc.event_count,
        }
    }

    /// Key downstream consumers deduplicate on after a replay
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.window_start.timestamp_millis(),
            self.group_id,
            self.price,
            self.direction
        )
    }
}
