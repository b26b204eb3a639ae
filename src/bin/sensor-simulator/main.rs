mod args;
mod payload;

use std::{process::ExitCode, time::Duration};

use anyhow::{Context as _, Result, bail};
use args::Args;
use barn_telemetry::{config::READY_MARKER, logging};
use clap::Parser as _;
use rand::Rng as _;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
    time::{sleep, timeout},
};

use crate::payload::random_payload;

const MARKER_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(10);

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
    let mut sent = 0;

    while args.count.is_none_or(|count| sent < count) {
        match send_reading(&args).await {
            Ok(()) => {
                sent += 1;
                let wait = Duration::from_secs(rand::thread_rng().gen_range(5..=15));
                tracing::info!(sent, ?wait, "reading sent");
                if args.count.is_some_and(|count| sent >= count) {
                    break;
                }
                sleep(wait).await;
            }
            Err(err) => {
                tracing::warn!("{err:#}; retrying in {RETRY_DELAY:?}");
                sleep(RETRY_DELAY).await;
            }
        }
    }

    Ok(())
}

async fn send_reading(args: &Args) -> Result<()> {
    let mut stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    let mut marker = [0u8; 1];
    timeout(MARKER_TIMEOUT, stream.read_exact(&mut marker))
        .await
        .context("timed out waiting for ready marker")?
        .context("failed to read ready marker")?;
    if marker[0] != READY_MARKER {
        bail!("unexpected marker from server: 0x{:02x}", marker[0]);
    }

    let payload = random_payload(&mut rand::thread_rng(), &args.device_id, &args.reported_ip);
    tracing::debug!(%payload, "sending reading");

    stream
        .write_all(payload.to_string().as_bytes())
        .await
        .context("failed to send reading")?;
    stream.shutdown().await.context("failed to close connection")?;

    Ok(())
}
