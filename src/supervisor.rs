use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::{OwnedSemaphorePermit, Semaphore, watch},
    task::{JoinError, JoinSet},
    time::{Instant, sleep},
};
use tracing::Instrument as _;

use crate::{config::SupervisorConfig, session::run_session, writer::StorageWriter};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop for device connections.
///
/// Every connection gets its own session task, tracked in a [`JoinSet`] so
/// shutdown can abort whatever is still in flight. A failing or panicking
/// session never reaches the loop.
pub struct Supervisor {
    listener: TcpListener,
    writer: StorageWriter,
    config: SupervisorConfig,
    limit: Option<Arc<Semaphore>>,
}

impl Supervisor {
    pub fn new(listener: TcpListener, writer: StorageWriter, config: SupervisorConfig) -> Self {
        let limit = config
            .max_sessions
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        Self {
            listener,
            writer,
            config,
            limit,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut sessions = JoinSet::new();

        tracing::info!(
            max_sessions = ?self.config.max_sessions,
            grace = ?self.config.session.grace,
            timeout = ?self.config.session.timeout,
            "accepting device connections"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(joined);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(&mut sessions, stream, peer),
                    Err(err) => {
                        tracing::error!("failed to accept connection: {err}");
                        sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        tracing::info!(active = sessions.len(), "stopping, aborting active sessions");
        sessions.abort_all();
        while let Some(joined) = sessions.join_next().await {
            reap(joined);
        }
    }

    fn spawn_session(&self, sessions: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let accepted_at = Instant::now();

        let permit = match self.try_admit() {
            Ok(permit) => permit,
            Err(()) => {
                tracing::warn!(%peer, "session limit reached, closing connection");
                return;
            }
        };

        let writer = self.writer.clone();
        let config = self.config.session.clone();
        let span = tracing::info_span!("session", %peer);

        sessions.spawn(
            async move {
                let _permit = permit;
                run_session(stream, peer, accepted_at, &writer, &config).await;
            }
            .instrument(span),
        );
    }

    fn try_admit(&self) -> Result<Option<OwnedSemaphorePermit>, ()> {
        match &self.limit {
            None => Ok(None),
            Some(limit) => limit.clone().try_acquire_owned().map(Some).map_err(|_| ()),
        }
    }
}

fn reap(joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(err) if err.is_panic() => tracing::error!("session panicked: {err}"),
        Err(err) => tracing::debug!("session cancelled: {err}"),
    }
}
