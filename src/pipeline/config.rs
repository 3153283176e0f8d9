//! Pipeline configuration from environment variables
//!
//! Every option has a default; an option that is set but cannot be parsed,
//! or that violates a constraint, is a fatal `ConfigError`.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Transport collaborator could not be reached at startup
    #[error("Transport unavailable: {0}")]
    Unreachable(String),
}

/// Configuration for the aggregation runtime
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// `transport.endpoints` - broker addresses (`host:port`)
    pub endpoints: Vec<String>,

    /// `input.topic`
    pub input_topic: String,

    /// `output.topic`
    pub output_topic: String,

    /// `consumer.group`
    pub consumer_group: String,

    /// `window.lengthSeconds`
    pub window_length_secs: u64,

    /// `scheduler.tickIntervalMs`
    pub tick_interval_ms: u64,

    /// `emit.maxRetries`
    pub emit_max_retries: u32,

    /// `emit.backoffBaseMs`
    pub emit_backoff_base_ms: u64,

    /// Upper bound for a single backoff sleep
    pub emit_max_backoff_ms: u64,

    /// Upper bound for a single publish attempt
    pub emit_publish_timeout_ms: u64,

    /// Number of key-partitioned ingestion workers
    pub workers: usize,

    /// Per-worker channel buffer (events)
    pub channel_buffer: usize,

    /// Interval between metric summaries in the log
    pub metrics_log_interval_ms: u64,

    /// JSONL input file, `-` for stdin
    pub input_path: String,

    /// Directory holding output and dead-letter JSONL files
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:9092".to_string()],
            input_topic: "trades-new".to_string(),
            output_topic: "trades-aggregated".to_string(),
            consumer_group: "trade-volume-consumer".to_string(),
            window_length_secs: 20,
            tick_interval_ms: 1_000,
            emit_max_retries: 5,
            emit_backoff_base_ms: 100,
            emit_max_backoff_ms: 5_000,
            emit_publish_timeout_ms: 10_000,
            workers: 4,
            channel_buffer: 10_000,
            metrics_log_interval_ms: 10_000,
            input_path: "-".to_string(),
            output_dir: PathBuf::from("streams"),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `VOLFLOW_TRANSPORT_ENDPOINTS` (default: localhost:9092, comma-separated)
    /// - `VOLFLOW_INPUT_TOPIC` (default: trades-new)
    /// - `VOLFLOW_OUTPUT_TOPIC` (default: trades-aggregated)
    /// - `VOLFLOW_CONSUMER_GROUP` (default: trade-volume-consumer)
    /// - `VOLFLOW_WINDOW_LENGTH_SECONDS` (default: 20)
    /// - `VOLFLOW_SCHEDULER_TICK_INTERVAL_MS` (default: 1000)
    /// - `VOLFLOW_EMIT_MAX_RETRIES` (default: 5)
    /// - `VOLFLOW_EMIT_BACKOFF_BASE_MS` (default: 100)
    /// - `VOLFLOW_EMIT_MAX_BACKOFF_MS` (default: 5000)
    /// - `VOLFLOW_EMIT_PUBLISH_TIMEOUT_MS` (default: 10000)
    /// - `VOLFLOW_INGEST_WORKERS` (default: 4)
    /// - `VOLFLOW_CHANNEL_BUFFER` (default: 10000)
    /// - `VOLFLOW_METRICS_LOG_INTERVAL_MS` (default: 10000)
    /// - `VOLFLOW_INPUT_PATH` (default: `-`, stdin)
    /// - `VOLFLOW_OUTPUT_DIR` (default: streams)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let endpoints = match lookup("VOLFLOW_TRANSPORT_ENDPOINTS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.endpoints,
        };

        let config = Self {
            endpoints,
            input_topic: lookup("VOLFLOW_INPUT_TOPIC").unwrap_or(defaults.input_topic),
            output_topic: lookup("VOLFLOW_OUTPUT_TOPIC").unwrap_or(defaults.output_topic),
            consumer_group: lookup("VOLFLOW_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            window_length_secs: parse_var(
                &lookup,
                "VOLFLOW_WINDOW_LENGTH_SECONDS",
                defaults.window_length_secs,
            )?,
            tick_interval_ms: parse_var(
                &lookup,
                "VOLFLOW_SCHEDULER_TICK_INTERVAL_MS",
                defaults.tick_interval_ms,
            )?,
            emit_max_retries: parse_var(&lookup, "VOLFLOW_EMIT_MAX_RETRIES", defaults.emit_max_retries)?,
            emit_backoff_base_ms: parse_var(
                &lookup,
                "VOLFLOW_EMIT_BACKOFF_BASE_MS",
                defaults.emit_backoff_base_ms,
            )?,
            emit_max_backoff_ms: parse_var(
                &lookup,
                "VOLFLOW_EMIT_MAX_BACKOFF_MS",
                defaults.emit_max_backoff_ms,
            )?,
            emit_publish_timeout_ms: parse_var(
                &lookup,
                "VOLFLOW_EMIT_PUBLISH_TIMEOUT_MS",
                defaults.emit_publish_timeout_ms,
            )?,
            workers: parse_var(&lookup, "VOLFLOW_INGEST_WORKERS", defaults.workers)?,
            channel_buffer: parse_var(&lookup, "VOLFLOW_CHANNEL_BUFFER", defaults.channel_buffer)?,
            metrics_log_interval_ms: parse_var(
                &lookup,
                "VOLFLOW_METRICS_LOG_INTERVAL_MS",
                defaults.metrics_log_interval_ms,
            )?,
            input_path: lookup("VOLFLOW_INPUT_PATH").unwrap_or(defaults.input_path),
            output_dir: lookup("VOLFLOW_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_length_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "window.lengthSeconds must be greater than zero".to_string(),
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.tickIntervalMs must be greater than zero".to_string(),
            ));
        }

        if self.workers == 0 {
            return Err(ConfigError::InvalidValue(
                "ingest.workers must be greater than zero".to_string(),
            ));
        }

        if self.channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "ingest.channelBuffer must be greater than zero".to_string(),
            ));
        }

        if self.input_topic.trim().is_empty() {
            return Err(ConfigError::MissingVariable("input.topic".to_string()));
        }

        if self.output_topic.trim().is_empty() {
            return Err(ConfigError::MissingVariable("output.topic".to_string()));
        }

        if self.consumer_group.trim().is_empty() {
            return Err(ConfigError::MissingVariable("consumer.group".to_string()));
        }

        if self.endpoints.is_empty() {
            return Err(ConfigError::MissingVariable("transport.endpoints".to_string()));
        }

        for endpoint in &self.endpoints {
            validate_endpoint(endpoint)?;
        }

        Ok(())
    }

    pub fn window_length(&self) -> Duration {
        Duration::from_secs(self.window_length_secs)
    }

    /// Closure-check cadence: never coarser than the window itself
    pub fn tick_interval(&self) -> Duration {
        let window_ms = self.window_length_secs.saturating_mul(1_000);
        Duration::from_millis(self.tick_interval_ms.min(window_ms))
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.jsonl", self.output_topic))
    }

    pub fn dead_letter_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}-dlq.jsonl", self.output_topic))
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} has unparsable value '{}'", name, raw))
        }),
        None => Ok(default),
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(|| {
        ConfigError::InvalidValue(format!("endpoint '{}' must be host:port", endpoint))
    })?;

    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ConfigError::InvalidValue(format!(
            "endpoint '{}' must be host:port",
            endpoint
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.endpoints, vec!["localhost:9092".to_string()]);
        assert_eq!(config.input_topic, "trades-new");
        assert_eq!(config.output_topic, "trades-aggregated");
        assert_eq!(config.window_length_secs, 20);
        assert_eq!(config.tick_interval_ms, 1_000);
        assert_eq!(config.emit_max_retries, 5);
        assert_eq!(config.workers, 4);
        assert_eq!(config.output_path(), PathBuf::from("streams/trades-aggregated.jsonl"));
        assert_eq!(
            config.dead_letter_path(),
            PathBuf::from("streams/trades-aggregated-dlq.jsonl")
        );
    }

    #[test]
    fn test_custom_config() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("VOLFLOW_TRANSPORT_ENDPOINTS", "broker-1:9092, broker-2:9093"),
            ("VOLFLOW_WINDOW_LENGTH_SECONDS", "60"),
            ("VOLFLOW_EMIT_MAX_RETRIES", "2"),
            ("VOLFLOW_INGEST_WORKERS", "8"),
            ("VOLFLOW_OUTPUT_DIR", "/tmp/volflow"),
        ]))
        .unwrap();

        assert_eq!(config.endpoints, vec!["broker-1:9092", "broker-2:9093"]);
        assert_eq!(config.window_length(), Duration::from_secs(60));
        assert_eq!(config.emit_max_retries, 2);
        assert_eq!(config.workers, 8);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/volflow"));
    }

    #[test]
    fn test_zero_window_length_is_fatal() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("VOLFLOW_WINDOW_LENGTH_SECONDS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_unparsable_value_is_fatal() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("VOLFLOW_EMIT_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("VOLFLOW_EMIT_MAX_RETRIES"));
    }

    #[test]
    fn test_malformed_endpoint_rejected() {
        let err = PipelineConfig::from_lookup(lookup_from(&[(
            "VOLFLOW_TRANSPORT_ENDPOINTS",
            "localhost",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let err = PipelineConfig::from_lookup(lookup_from(&[("VOLFLOW_TRANSPORT_ENDPOINTS", " , ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(_)));
    }

    #[test]
    fn test_tick_interval_capped_by_window() {
        let config = PipelineConfig {
            window_length_secs: 1,
            tick_interval_ms: 5_000,
            ..PipelineConfig::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(1_000));
    }
}
