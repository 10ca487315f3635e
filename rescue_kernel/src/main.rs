//! Rescue simulation kernel CLI.
//!
//! Bootstraps the world model from a remote GIS, opens the component port,
//! and drives the tick loop.

use clap::Parser;
use rescue_core::config::{Config, GIS_PORT_KEY};
use rescue_core::connection::{Codec, ConnectionManager};
use rescue_kernel::{ComponentGateway, Kernel, RemoteGisModelSource, SessionTable};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rescue-kernel", about = "Disaster simulation kernel")]
struct Args {
    /// Port of the GIS service to bootstrap the world model from.
    #[arg(long, default_value_t = 7000)]
    gis_port: u16,

    /// Port to accept component connections on.
    #[arg(long, default_value_t = 7001)]
    port: u16,

    /// Number of ticks to run.
    #[arg(long, default_value_t = 300)]
    ticks: u64,

    /// Wall-clock pause between ticks, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    tick_interval_ms: u64,

    /// Seconds to wait for components to join before the first tick.
    #[arg(long, default_value_t = 10)]
    startup_wait_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();
    let codec = Arc::new(Codec::new());

    let model = RemoteGisModelSource::new(args.gis_port)
        .build_world_model(codec.clone())
        .await?;
    info!("World model ready: {} entities", model.len());
    let model = Arc::new(Mutex::new(model));

    let mut kernel_config = Config::new();
    kernel_config.set(GIS_PORT_KEY, args.gis_port);
    kernel_config.set("kernel.tick-interval-ms", args.tick_interval_ms);

    let sessions = Arc::new(Mutex::new(SessionTable::new()));
    let (gateway, replies) = ComponentGateway::new(model.clone(), sessions.clone(), kernel_config);
    let manager = ConnectionManager::new();
    manager
        .listen(args.port, codec, Arc::new(gateway))
        .await?;

    info!(
        "Waiting {}s for components to join...",
        args.startup_wait_secs
    );
    tokio::time::sleep(Duration::from_secs(args.startup_wait_secs)).await;
    info!(
        "Starting simulation with {} component(s)",
        sessions.lock().unwrap().live_count()
    );

    let mut kernel = Kernel::new(model, sessions, replies);
    for _ in 0..args.ticks {
        kernel.tick().await;
        tokio::time::sleep(Duration::from_millis(args.tick_interval_ms)).await;
    }

    info!("Simulation finished after {} ticks", kernel.tick_number());
    manager.shutdown().await;
    Ok(())
}
