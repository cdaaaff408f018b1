use std::sync::Arc;

use airport_telemetry::{
    actors::alert::AlertEvaluator,
    config::read_app_config,
    thresholds::ThresholdStore,
    transport::{Connector, QoS, mqtt::MqttConnector},
};
use anyhow::Context;
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const CLIENT_ID: &str = "alert_manager";

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Application config file
    #[arg(short, long, default_value = "config/app_config.toml")]
    config: String,

    /// Transport identity
    #[arg(long, default_value = CLIENT_ID)]
    client_id: String,

    #[arg(long, default_value_t = LevelFilter::TRACE)]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("airport_telemetry", level),
        ("alert_manager", level),
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

    let config = read_app_config(&args.config)?;

    let thresholds = ThresholdStore::new(
        config.thresholds.path.clone(),
        config.thresholds.reload_on_every_call,
    );
    // the process cannot alert without thresholds, so fail fast
    thresholds.load().await?;

    let transport = MqttConnector::new(config.broker_address.clone())
        .with_ack_timeout(config.ack_timeout())
        .connect(&args.client_id)
        .await?;

    let evaluator = Arc::new(AlertEvaluator::new(
        thresholds,
        transport.clone(),
        config.topics.alert_prefix(),
    ));

    let filter = config.topics.subscribe_filter();
    transport
        .subscribe(&filter, QoS::AtLeastOnce, evaluator.clone())
        .await?;

    info!("evaluating measurements on {filter}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    transport.disconnect().await;
    info!("stopped after {:?}", evaluator.stats());

    Ok(())
}
