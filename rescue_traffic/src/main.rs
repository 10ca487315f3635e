//! Traffic simulator component CLI.
//!
//! Joins a running kernel, then serves the tick loop until the connection
//! closes.

use clap::Parser;
use rescue_core::components::SimulatorComponent;
use rescue_core::connection::{Codec, Connection};
use rescue_traffic::{TrafficConfig, TrafficSimulator};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rescue-traffic", about = "Area-model traffic simulator")]
struct Args {
    /// Kernel address to join.
    #[arg(long, default_value = "127.0.0.1:7001")]
    kernel: String,

    /// Seed for the velocity generator.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Sub-step duration in milliseconds.
    #[arg(long, default_value_t = 100.0)]
    step_time_ms: f64,

    /// Seconds of wall-clock one tick represents.
    #[arg(long, default_value_t = 60.0)]
    tick_seconds: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let config = TrafficConfig {
        seed: args.seed,
        step_time_ms: args.step_time_ms,
        tick_seconds: args.tick_seconds,
        ..TrafficConfig::default()
    };

    let codec = Arc::new(Codec::new());
    let connection = Connection::connect(args.kernel.as_str(), codec).await?;
    connection.start();

    let mut component =
        SimulatorComponent::connect(connection, TrafficSimulator::new(config)).await?;
    info!("Joined kernel as {}", component.session_id());
    component.run().await?;
    Ok(())
}
