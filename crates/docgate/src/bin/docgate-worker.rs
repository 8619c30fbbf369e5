use anyhow::Result;
use clap::Parser;
use docgate::telemetry::{init_tracing, TelemetryConfig};
use docgate::worker::{self, WorkerArgs};
use tracing::Instrument;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    let args = WorkerArgs::parse();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "docgate=info")
    let telemetry_config = TelemetryConfig::from_env().with_service_name("docgate-worker");
    if let Err(e) = init_tracing(&telemetry_config) {
        eprintln!("docgate-worker: tracing already initialized: {}", e);
    }

    let span = telemetry_config.root_span();
    span.in_scope(|| {
        tracing::info!(fault_injection = args.fault_injection, "docgate-worker starting...");
    });

    if let Err(e) = worker::run(args).instrument(span.clone()).await {
        span.in_scope(|| tracing::error!(error = %e, "Worker error"));
        return Err(e);
    }
    Ok(())
}
