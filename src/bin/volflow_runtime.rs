//! Volflow Runtime - windowed trade volume aggregation
//!
//! Reads trade events as JSON lines, aggregates volume per
//! (groupId, price, direction) over tumbling windows and appends one
//! aggregate per key per window to the output topic file.
//!
//! Usage:
//!   cargo run --release --bin volflow_runtime < trades.jsonl
//!
//! Environment variables (see `PipelineConfig::from_env` for the full list):
//!   VOLFLOW_WINDOW_LENGTH_SECONDS - Tumbling window size (default: 20)
//!   VOLFLOW_INPUT_PATH - JSONL input, `-` for stdin (default: -)
//!   VOLFLOW_OUTPUT_DIR - Output directory (default: streams)
//!   VOLFLOW_OUTPUT_TOPIC - Output topic / file stem (default: trades-aggregated)

use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;
use volflow::pipeline::{ConfigError, PipelineConfig, PipelineRuntime};
use volflow::transport::{
    AggregatePublisher, DeadLetterSink, JsonlDeadLetterSink, JsonlPublisher, JsonlSource,
};

const OUTPUT_MAX_SIZE_MB: u64 = 100;
const OUTPUT_MAX_ROTATIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Volflow Runtime");

    let config = PipelineConfig::from_env()?;

    info!("📊 Configuration:");
    info!("   ├─ Endpoints: {}", config.endpoints.join(","));
    info!("   ├─ Input topic: {} ({})", config.input_topic, config.input_path);
    info!("   ├─ Output topic: {}", config.output_topic);
    info!("   ├─ Consumer group: {}", config.consumer_group);
    info!("   ├─ Window: {}s", config.window_length_secs);
    info!("   ├─ Scheduler tick: {}ms", config.tick_interval().as_millis());
    info!(
        "   ├─ Emit retries: {} (base backoff {}ms)",
        config.emit_max_retries, config.emit_backoff_base_ms
    );
    info!("   └─ Workers: {}", config.workers);

    let source = JsonlSource::open(&config.input_path).await.map_err(|e| {
        ConfigError::Unreachable(format!("input {}: {}", config.input_path, e))
    })?;

    let publisher: Arc<dyn AggregatePublisher> = Arc::new(JsonlPublisher::new(
        config.output_path(),
        OUTPUT_MAX_SIZE_MB,
        OUTPUT_MAX_ROTATIONS,
    )?);
    let dead_letters: Arc<dyn DeadLetterSink> =
        Arc::new(JsonlDeadLetterSink::new(config.dead_letter_path())?);

    let runtime = PipelineRuntime::new(config, publisher, dead_letters)?;
    info!("✅ Pipeline ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️  Received CTRL+C, shutting down...");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                error!("❌ Failed to listen for CTRL+C: {}", err);
                // Dropping the sender would read as a shutdown request
                std::future::pending::<()>().await;
            }
        }
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");
    let summary = runtime.run(source, shutdown_rx).await?;

    info!("📊 Run summary:");
    info!("   ├─ Records read: {}", summary.ingestion.records_read);
    info!("   ├─ Events merged: {}", summary.metrics.events_merged);
    info!("   ├─ Dropped: {}", summary.metrics.dropped_events());
    info!("   ├─ Aggregates emitted: {}", summary.metrics.aggregates_emitted);
    info!("   └─ Dead-lettered: {}", summary.metrics.dead_lettered);
    info!("✅ Volflow runtime stopped");

    Ok(())
}
