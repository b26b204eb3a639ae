mod args;

use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use args::Args;
use barn_telemetry::{
    config::FeedConfig,
    db::{PgStore, new_pool},
    feed::ChangeFeed,
    logging,
    thresholds::{Thresholds, report_readings},
};
use clap::Parser as _;
use tokio::{signal, sync::watch};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let pool = new_pool(&args.database_url)
        .await
        .context("failed to connect to database")?;
    let store = Arc::new(PgStore::new(pool, args.timezone));

    let config = FeedConfig {
        page_size: args.page_size,
        poll_interval: Duration::from_secs(args.poll_secs),
        delivery_timeout: Duration::from_secs(args.delivery_timeout_secs),
        ..FeedConfig::default()
    };
    let mut feed = ChangeFeed::new(store, config);
    let subscription = feed.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed_task = tokio::spawn(feed.run(shutdown_rx));
    let report_task = tokio::spawn(report_readings(subscription, Thresholds::default()));

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    shutdown_tx.send_replace(true);

    feed_task.await.context("change feed task failed")?;
    report_task.await.context("report task failed")?;

    Ok(())
}
