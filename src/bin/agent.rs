use anyhow::Context;
use monitorx::{
    actors::reporter::{ReporterConfig, ReporterHandle},
    sampler::SystemSampler,
};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("monitorx", LevelFilter::DEBUG),
        ("monitorx_agent", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(true),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = ReporterConfig::from_env();
    info!(
        "agent {} reporting to {} every {:?}",
        config.agent_id, config.server_url, config.interval
    );

    let reporter = ReporterHandle::spawn(config, Box::new(SystemSampler::new()))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    warn!("received ctrl-c, shutting down");

    reporter.shutdown().await?;
    Ok(())
}
