mod bus;
mod config;
mod db;
mod poller;
mod tracker;

use crate::bus::{I2cStatusBus, SensorReader};
use crate::config::Config;
use crate::db::ReadingSink;
use crate::poller::Poller;
use crate::tracker::UsageTracker;
use anyhow::Result;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,meterbox_monitor=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    // The service is useless without durable storage, so setup failures here
    // are fatal; everything after this point degrades instead of exiting.
    let pool = db::build_pool(&config.database_url).await?;
    db::init_schema(&pool).await?;
    let sink = ReadingSink::new(pool);

    let i2c = I2cStatusBus::open(config.i2c_bus, config.i2c_address, config.i2c_timeout_ms)?;
    let reader = SensorReader::new(i2c, &config.channels);
    let tracker = UsageTracker::new(&config.channels, config.bootstrap_policy);

    tracing::info!(
        bus = config.i2c_bus,
        address = %format!("{:#04x}", config.i2c_address),
        channels = config.channels.len(),
        policy = ?config.bootstrap_policy,
        settle_ms = config.settle_delay_ms,
        "meterbox-monitor starting"
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let poller = Poller::new(reader, tracker, sink, config.settle_delay());
    poller.run(cancel).await
}
