//! Integration tests for the runtime: shutdown drain, JSONL end-to-end,
//! dead-letter reporting.
//!
//! The clock is pinned inside the first window so nothing closes on a tick;
//! every emission observed here comes from the drain.

#[cfg(test)]
mod shutdown_drain_tests {
    use std::sync::Arc;
    use tokio::sync::watch;
    use tokio::time::{sleep, timeout, Duration};
    use volflow::pipeline::{PipelineConfig, PipelineRuntime};
    use volflow::transport::{
        ChannelSource, JsonlDeadLetterSink, JsonlPublisher, JsonlSource, MemoryDeadLetterSink,
        MemoryPublisher,
    };

    fn config() -> PipelineConfig {
        PipelineConfig {
            workers: 3,
            tick_interval_ms: 10,
            emit_backoff_base_ms: 1,
            emit_max_backoff_ms: 2,
            metrics_log_interval_ms: 50,
            ..PipelineConfig::default()
        }
    }

    fn trade(group: &str, volume: i64) -> Vec<u8> {
        format!(
            r#"{{"groupId":"{}","price":100.0,"volume":{},"direction":"BUY"}}"#,
            group, volume
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_shutdown_signal_drains_open_windows() {
        // Test: open window with pending merges is emitted before run() returns
        let publisher = Arc::new(MemoryPublisher::new());
        let runtime = Arc::new(
            PipelineRuntime::new_with_timestamp_fn(
                config(),
                publisher.clone(),
                Arc::new(MemoryDeadLetterSink::new()),
                Arc::new(|| 5_000),
            )
            .unwrap(),
        );

        let (tx, source) = ChannelSource::new(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run_runtime = runtime.clone();
        let handle = tokio::spawn(async move { run_runtime.run(source, shutdown_rx).await });

        for group in ["G1", "G2", "G1", "G3"] {
            tx.send(trade(group, 5)).await.unwrap();
        }

        // Wait for every event to be merged
        for _ in 0..100 {
            if runtime.engine().metrics().snapshot().events_merged == 4 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(publisher.published().is_empty(), "window closed before shutdown");

        shutdown_tx.send(true).unwrap();
        let summary = timeout(Duration::from_secs(5), handle)
            .await
            .expect("runtime did not stop")
            .unwrap()
            .unwrap();

        assert_eq!(summary.drained_windows, 1);
        assert_eq!(summary.metrics.aggregates_emitted, 3);
        assert_eq!(runtime.engine().store().live_accumulators(), 0);

        let mut totals: Vec<(String, u64)> = publisher
            .published_json()
            .iter()
            .map(|v| {
                (
                    v["groupId"].as_str().unwrap().to_string(),
                    v["totalVolume"].as_u64().unwrap(),
                )
            })
            .collect();
        totals.sort();
        assert_eq!(
            totals,
            vec![("G1".to_string(), 10), ("G2".to_string(), 5), ("G3".to_string(), 5)]
        );

        drop(tx);
    }

    #[tokio::test]
    async fn test_exhausted_publish_goes_to_dead_letter() {
        // Test: publisher keeps failing -> aggregate reported, not lost silently
        let publisher = Arc::new(MemoryPublisher::new());
        publisher.fail_next(100);
        let dlq = Arc::new(MemoryDeadLetterSink::new());

        let runtime = PipelineRuntime::new_with_timestamp_fn(
            PipelineConfig {
                emit_max_retries: 2,
                ..config()
            },
            publisher.clone(),
            dlq.clone(),
            Arc::new(|| 5_000),
        )
        .unwrap();

        let (tx, source) = ChannelSource::new(8);
        tx.send(trade("G1", 7)).await.unwrap();
        drop(tx);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let summary = runtime.run(source, shutdown_rx).await.unwrap();

        assert_eq!(summary.metrics.dead_lettered, 1);
        assert_eq!(summary.metrics.aggregates_emitted, 0);
        assert_eq!(publisher.attempts(), 3);

        let letters = dlq.letters();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].payload.contains("\"totalVolume\":7"));
    }

    #[tokio::test]
    async fn test_jsonl_end_to_end() {
        // Test: JSONL file in -> JSONL aggregates out, bad lines skipped
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("trades.jsonl");
        std::fs::write(
            &input,
            concat!(
                "{\"groupId\":\"G1\",\"price\":100.0,\"volume\":10,\"direction\":\"BUY\"}\n",
                "{\"groupId\":\"G1\",\"price\":100.0,\"volume\":5,\"direction\":\"BUY\"}\n",
                "{\"groupId\":\"G1\",\"price\":100.0,\"volume\":-1,\"direction\":\"BUY\"}\n",
                "not json\n",
                "{\"groupId\":\"G2\",\"price\":99.5,\"volume\":1,\"direction\":\"SELL\"}\n",
            ),
        )
        .unwrap();

        let config = PipelineConfig {
            output_dir: dir.path().join("out"),
            ..config()
        };
        let publisher = Arc::new(JsonlPublisher::new(config.output_path(), 100, 2).unwrap());
        let dlq = Arc::new(JsonlDeadLetterSink::new(config.dead_letter_path()).unwrap());
        let output_path = config.output_path();

        let runtime =
            PipelineRuntime::new_with_timestamp_fn(config, publisher, dlq, Arc::new(|| 5_000))
                .unwrap();

        let source = JsonlSource::open(input.to_str().unwrap()).await.unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let summary = runtime.run(source, shutdown_rx).await.unwrap();

        assert_eq!(summary.ingestion.records_read, 5);
        assert_eq!(summary.metrics.dropped_events(), 2);

        let contents = std::fs::read_to_string(output_path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        let g1 = lines.iter().find(|v| v["groupId"] == "G1").unwrap();
        assert_eq!(g1["totalVolume"].as_u64(), Some(15));
        assert_eq!(g1["eventCount"].as_u64(), Some(2));
        assert!(g1["windowEnd"].as_str().unwrap().starts_with("1970-01-01T00:00:20"));
    }
}
