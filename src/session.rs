//! One device connection: prompt, wait, read once, decode once, store.

use std::{io, net::SocketAddr};

use chrono::Utc;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _},
    time::{Instant, sleep_until, timeout, timeout_at},
};

use crate::{
    config::SessionConfig,
    store::StorageError,
    telemetry::{DecodeError, PersistedRow, decode},
    writer::StorageWriter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Accepted,
    GreetingSent,
    AwaitingPayload,
    Received,
    TimedOut,
    Malformed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to send ready marker: {0}")]
    Greeting(#[source] io::Error),

    #[error("failed to read payload: {0}")]
    Read(#[source] io::Error),
}

#[derive(Debug)]
pub enum SessionOutcome {
    Stored(PersistedRow),
    TimedOut,
    Malformed(DecodeError),
    TransportFailed(SessionError),
    StorageFailed(StorageError),
}

impl SessionOutcome {
    /// Phase the session was in when it ended.
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionOutcome::Stored(_) | SessionOutcome::StorageFailed(_) => SessionPhase::Received,
            SessionOutcome::TimedOut => SessionPhase::TimedOut,
            SessionOutcome::Malformed(_) => SessionPhase::Malformed,
            SessionOutcome::TransportFailed(SessionError::Greeting(_)) => SessionPhase::Accepted,
            SessionOutcome::TransportFailed(SessionError::Read(_)) => SessionPhase::AwaitingPayload,
        }
    }

    pub fn stored(&self) -> Option<&PersistedRow> {
        match self {
            SessionOutcome::Stored(row) => Some(row),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            SessionOutcome::Stored(row) => tracing::info!(
                id = row.id,
                device_id = %row.reading.device_id,
                "reading stored"
            ),
            SessionOutcome::TimedOut => tracing::warn!("no payload before timeout"),
            SessionOutcome::Malformed(err) => tracing::warn!("discarding payload: {err}"),
            SessionOutcome::TransportFailed(err) => tracing::warn!("{err}"),
            SessionOutcome::StorageFailed(err) => {
                tracing::warn!("failed to store reading: {err}")
            }
        }
    }
}

/// Drives one connection to completion and closes it.
///
/// `accepted_at` anchors the session deadline, which bounds the greeting, the
/// grace wait and the read. Storing the reading gets its own `store_timeout`.
/// The session makes exactly one read attempt and one decode attempt; a device
/// that gets it wrong has to reconnect.
pub async fn run_session<S>(
    mut stream: S,
    peer: SocketAddr,
    accepted_at: Instant,
    writer: &StorageWriter,
    config: &SessionConfig,
) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = exchange(&mut stream, peer, accepted_at, writer, config).await;

    if let Err(err) = stream.shutdown().await {
        tracing::debug!("failed to shut down connection: {err}");
    }

    outcome.log();
    outcome
}

async fn exchange<S>(
    stream: &mut S,
    peer: SocketAddr,
    accepted_at: Instant,
    writer: &StorageWriter,
    config: &SessionConfig,
) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = accepted_at + config.timeout;

    let greeting = async {
        stream.write_all(&[config.ready_marker]).await?;
        stream.flush().await
    };
    match timeout_at(deadline, greeting).await {
        Err(_) => return SessionOutcome::TimedOut,
        Ok(Err(err)) => return SessionOutcome::TransportFailed(SessionError::Greeting(err)),
        Ok(Ok(())) => {}
    }
    tracing::debug!(phase = ?SessionPhase::GreetingSent, "ready marker sent");

    sleep_until(deadline.min(Instant::now() + config.grace)).await;
    tracing::debug!(phase = ?SessionPhase::AwaitingPayload, "grace period over");

    let mut buf = vec![0u8; config.read_buffer];
    let n = match timeout_at(deadline, stream.read(&mut buf)).await {
        Err(_) => return SessionOutcome::TimedOut,
        Ok(Err(err)) => return SessionOutcome::TransportFailed(SessionError::Read(err)),
        Ok(Ok(n)) => n,
    };
    let payload = &buf[..n];
    tracing::debug!(payload = %String::from_utf8_lossy(payload), "payload received");

    let received_at = Utc::now().with_timezone(&config.timezone);
    let reading = match decode(payload, &peer.ip().to_string(), received_at) {
        Ok(reading) => reading,
        Err(err) => return SessionOutcome::Malformed(err),
    };

    match timeout(config.store_timeout, writer.append(reading)).await {
        Err(_) => SessionOutcome::StorageFailed(StorageError::TimedOut(config.store_timeout)),
        Ok(Ok(row)) => SessionOutcome::Stored(row),
        Ok(Err(err)) => SessionOutcome::StorageFailed(err),
    }
}
