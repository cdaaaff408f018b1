use std::sync::Arc;
use std::time::Duration;

use airport_telemetry::{
    acquirer::MeteoFranceAcquirer,
    actors::{sensor::RuntimeSettings, supervisor::SensorSupervisor},
    config::{read_app_config, read_sensor_configs},
    transport::mqtt::MqttConnector,
};
use anyhow::Context;
use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Sensors file
    #[arg(short)]
    file: String,

    /// Application config file
    #[arg(short, long, default_value = "config/app_config.toml")]
    config: String,

    /// Seconds to wait for runtimes to stop on shutdown
    #[arg(long, default_value_t = 5)]
    grace: u64,

    #[arg(long, default_value_t = LevelFilter::TRACE)]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("airport_telemetry", level),
        ("airport_sensors", level),
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
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    if let Err(e) = dotenv::dotenv() {
        trace!("no .env file loaded: {e}");
    }

    let config = read_app_config(&args.config)?;
    let descriptors = read_sensor_configs(&args.file)?;

    let acquirer = MeteoFranceAcquirer::from_config(&config.acquirer)
        .context("failed to set up the weather provider client")?;

    let supervisor = SensorSupervisor::new(
        Arc::new(
            MqttConnector::new(config.broker_address.clone())
                .with_ack_timeout(config.ack_timeout()),
        ),
        Arc::new(acquirer),
        RuntimeSettings {
            namespace: config.topics.namespace.clone(),
            acquisition_timeout: config.acquirer.timeout(),
        },
    )
    .with_grace_period(Duration::from_secs(args.grace));

    info!("starting {} sensor(s)", descriptors.len());

    supervisor
        .run_until(descriptors, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {e}");
            }
        })
        .await;

    Ok(())
}
