use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use monitorx::{
    api::{ApiConfig, ApiState, spawn_api_server},
    config::HubConfig,
    engine::Engine,
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(about = "Collects agent reports and serves live agent state")]
struct Args {
    /// Config file (TOML); built-in defaults are used when omitted
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Override the bind address from the config file
    #[arg(long)]
    bind: Option<SocketAddr>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("monitorx", LevelFilter::DEBUG),
        ("monitorx_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = HubConfig::load(args.file.as_deref()).context("failed to load config")?;
    if let Some(bind) = args.bind {
        config.api.bind = bind;
    }
    debug!("configuration: {config:?}");

    let api_config = ApiConfig::from(config.api.clone());
    let engine = Engine::new(config).context("invalid configuration")?;

    let health = engine.spawn_health_monitor();
    let addr = spawn_api_server(api_config, ApiState::new(engine.clone())).await?;
    info!("hub ready on {addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    warn!("received ctrl-c, shutting down");

    if let Err(e) = health.shutdown().await {
        warn!("health monitor already stopped: {e:#}");
    }
    engine.shutdown();

    Ok(())
}
