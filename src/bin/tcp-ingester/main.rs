mod args;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context as _, Result, anyhow};
use args::Args;
use barn_telemetry::{
    db::{PgStore, ensure_schema, new_pool},
    feed::ChangeFeed,
    logging,
    store::{MemoryStore, ReadingStore},
    supervisor::Supervisor,
    thresholds::{Thresholds, report_readings},
    writer::StorageWriter,
};
use clap::Parser as _;
use tokio::{net::TcpListener, signal, sync::watch};

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

    let store: Arc<dyn ReadingStore> = if args.in_memory {
        tracing::warn!("using in-memory store, readings are lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let database_url = args
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL is required without --in-memory"))?;
        let pool = new_pool(database_url)
            .await
            .context("failed to connect to database")?;
        if args.ensure_schema {
            ensure_schema(&pool)
                .await
                .context("failed to prepare database schema")?;
        }
        Arc::new(PgStore::new(pool, args.timezone))
    };

    let mut writer = StorageWriter::new(store.clone());
    if let Some(snapshot) = args.snapshot_config() {
        tracing::info!(path = ?snapshot.path, "writing CSV snapshot");
        writer = writer.with_snapshot(snapshot);
    }

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let supervisor = Supervisor::new(listener, writer, args.supervisor_config());
    tracing::info!(addr = %supervisor.local_addr()?, "server on");

    let mut feed = ChangeFeed::new(store, args.feed_config());
    let subscription = feed.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor_task = tokio::spawn(supervisor.run(shutdown_rx.clone()));
    let feed_task = tokio::spawn(feed.run(shutdown_rx));
    let report_task = tokio::spawn(report_readings(subscription, Thresholds::default()));

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    shutdown_tx.send_replace(true);

    supervisor_task.await.context("supervisor task failed")?;
    feed_task.await.context("change feed task failed")?;
    report_task.await.context("report task failed")?;

    Ok(())
}
