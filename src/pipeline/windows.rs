//! Tumbling window definitions and assignment

use super::config::ConfigError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Half-open interval `[start, end)` in epoch milliseconds
///
/// Ordering is by `start`; with a fixed window length this is also
/// ordering by `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId {
    pub start: i64,
    pub end: i64,
}

impl WindowId {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// True once wall-clock time has reached the exclusive end
    pub fn is_closed_at(&self, now: i64) -> bool {
        self.end <= now
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        bound_time(self.start)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        bound_time(self.end)
    }
}

/// Window bound as a UTC timestamp, falling back to the epoch when unrepresentable
fn bound_time(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(|| {
        log::warn!(
            "⚠️  Window bound {}ms is outside the representable range, using epoch",
            millis
        );
        DateTime::<Utc>::UNIX_EPOCH
    })
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Maps an arrival timestamp to the window it belongs to
///
/// Processing-time tumbling windows are the only built-in assigner. An
/// event-time assigner would plug in here.
pub trait WindowAssigner: Send + Sync {
    /// Pure and total: every timestamp maps to exactly one window
    fn assign(&self, timestamp: i64) -> WindowId;

    /// Window length in milliseconds
    fn length_ms(&self) -> i64;
}

/// Epoch-aligned, non-overlapping, fixed-length windows
#[derive(Debug, Clone, Copy)]
pub struct TumblingWindowAssigner {
    length_ms: i64,
}

impl TumblingWindowAssigner {
    pub fn new(length: Duration) -> Result<Self, ConfigError> {
        let length_ms = i64::try_from(length.as_millis()).map_err(|_| {
            ConfigError::InvalidValue(format!("window length too large: {:?}", length))
        })?;

        if length_ms <= 0 {
            return Err(ConfigError::InvalidValue(
                "window length must be greater than zero".to_string(),
            ));
        }

        Ok(Self { length_ms })
    }

    pub fn from_secs(secs: u64) -> Result<Self, ConfigError> {
        Self::new(Duration::from_secs(secs))
    }
}

impl WindowAssigner for TumblingWindowAssigner {
    fn assign(&self, timestamp: i64) -> WindowId {
        // div_euclid floors toward negative infinity, so pre-epoch timestamps align too
        let start = timestamp.div_euclid(self.length_ms) * self.length_ms;
        WindowId::new(start, start.saturating_add(self.length_ms))
    }

    fn length_ms(&self) -> i64 {
        self.length_ms
    }
}
