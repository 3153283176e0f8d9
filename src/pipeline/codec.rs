//! Fixed-schema JSON codec for inbound trades and outbound aggregates

use super::error::{PipelineError, PipelineResult};
use super::types::{AggregatedTrade, TradeEvent};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Inbound wire record
///
/// `price` is parsed with arbitrary precision so it never passes through `f64`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TradeMessage {
    pub group_id: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub price: Decimal,
    pub volume: i64,
    pub direction: String,
}

impl TradeMessage {
    /// Check field constraints and stamp the arrival time
    pub fn into_event(self, arrival_timestamp: i64) -> PipelineResult<TradeEvent> {
        if self.volume < 0 {
            return Err(PipelineError::Validation(format!(
                "negative volume {} for group {}",
                self.volume, self.group_id
            )));
        }

        if self.group_id.trim().is_empty() {
            return Err(PipelineError::Validation("empty groupId".to_string()));
        }

        if self.direction.is_empty() {
            return Err(PipelineError::Validation(format!(
                "empty direction for group {}",
                self.group_id
            )));
        }

        Ok(TradeEvent {
            group_id: self.group_id,
            price: self.price,
            direction: self.direction,
            volume: self.volume as u64,
            arrival_timestamp,
        })
    }
}

pub fn decode_trade(payload: &[u8]) -> PipelineResult<TradeMessage> {
    serde_json::from_slice(payload).map_err(|e| PipelineError::Decode(e.to_string()))
}

/// Decode, validate and stamp a raw record in one step
pub fn decode_event(payload: &[u8], arrival_timestamp: i64) -> PipelineResult<TradeEvent> {
    decode_trade(payload)?.into_event(arrival_timestamp)
}

pub fn encode_aggregate(aggregate: &AggregatedTrade) -> PipelineResult<Vec<u8>> {
    serde_json::to_vec(aggregate).map_err(|e| PipelineError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Accumulator, AggregationKey};
    use crate::pipeline::windows::WindowId;
    use std::str::FromStr;

    #[test]
    fn test_decode_valid_trade() {
        let raw = br#"{"groupId":"G1","price":100.10,"volume":10,"direction":"BUY"}"#;
        let event = decode_event(raw, 1_500).unwrap();

        assert_eq!(event.group_id, "G1");
        assert_eq!(event.price, Decimal::from_str("100.10").unwrap());
        assert_eq!(event.price.to_string(), "100.10");
        assert_eq!(event.volume, 10);
        assert_eq!(event.direction, "BUY");
        assert_eq!(event.arrival_timestamp, 1_500);
    }

    #[test]
    fn test_price_keeps_full_precision() {
        let raw = br#"{"groupId":"G1","price":0.1000000000000000055511151231,"volume":1,"direction":"SELL"}"#;
        let event = decode_event(raw, 0).unwrap();
        assert_eq!(event.price.to_string(), "0.1000000000000000055511151231");
    }

    #[test]
    fn test_negative_volume_is_validation_error() {
        let raw = br#"{"groupId":"G1","price":100.0,"volume":-1,"direction":"BUY"}"#;
        assert!(matches!(decode_event(raw, 0), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_malformed_payloads_are_decode_errors() {
        let cases: [&[u8]; 4] = [
            b"not json",
            br#"{"groupId":"G1","price":100.0,"direction":"BUY"}"#,
            br#"{"groupId":"G1","price":100.0,"volume":1.5,"direction":"BUY"}"#,
            br#"{"groupId":"G1","price":100.0,"volume":1,"direction":"BUY","extra":true}"#,
        ];

        for raw in cases {
            assert!(
                matches!(decode_event(raw, 0), Err(PipelineError::Decode(_))),
                "expected decode error for {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_empty_group_is_validation_error() {
        let raw = br#"{"groupId":"  ","price":1,"volume":1,"direction":"BUY"}"#;
        assert!(matches!(decode_event(raw, 0), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_encode_aggregate_schema() {
        let key = AggregationKey::new("G1", Decimal::from_str("100.0").unwrap(), "BUY");
        let mut acc = Accumulator::new(&key, 10);
        acc.add(5).unwrap();
        let aggregate = AggregatedTrade::from_accumulator(WindowId::new(0, 20_000), &key, &acc);

        let bytes = encode_aggregate(&aggregate).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["groupId"], "G1");
        assert_eq!(value["direction"], "BUY");
        assert_eq!(value["totalVolume"].as_u64(), Some(15));
        assert!(value["price"].is_number());
        assert!(value["windowStart"].as_str().unwrap().starts_with("1970-01-01T00:00:00"));
        assert!(value["windowEnd"].as_str().unwrap().starts_with("1970-01-01T00:00:20"));

        let decoded: AggregatedTrade = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, aggregate);
    }
}
