use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use crate::{
    config::SnapshotConfig,
    export::write_snapshot,
    store::{ReadingStore, StorageError},
    telemetry::{PersistedRow, Reading},
};

/// Appends readings to the store and keeps the CSV snapshot current.
///
/// Safe to share between sessions; concurrent appends become independent rows.
#[derive(Clone)]
pub struct StorageWriter {
    store: Arc<dyn ReadingStore>,
    snapshot: Option<Snapshot>,
}

#[derive(Clone)]
struct Snapshot {
    path: PathBuf,
    max_buffered: usize,
    rows: Arc<Mutex<VecDeque<PersistedRow>>>,
}

impl StorageWriter {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self {
            store,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, config: SnapshotConfig) -> Self {
        self.snapshot = Some(Snapshot {
            path: config.path,
            max_buffered: config.max_buffered.max(1),
            rows: Arc::new(Mutex::new(VecDeque::new())),
        });
        self
    }

    pub async fn append(&self, reading: Reading) -> Result<PersistedRow, StorageError> {
        let row = self.store.insert(&reading).await?;

        if let Some(snapshot) = &self.snapshot {
            snapshot.record(row.clone()).await;
        }

        Ok(row)
    }

    /// Number of readings currently held for the snapshot.
    pub fn buffered(&self) -> usize {
        let Some(snapshot) = &self.snapshot else {
            return 0;
        };

        match snapshot.rows.lock() {
            Ok(rows) => rows.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Snapshot {
    // The row is already durable at this point, so failures here are only logged.
    async fn record(&self, row: PersistedRow) {
        let snapshot = self.clone();
        let id = row.id;

        let result = tokio::task::spawn_blocking(move || {
            let mut rows = match snapshot.rows.lock() {
                Ok(rows) => rows,
                Err(poisoned) => poisoned.into_inner(),
            };

            rows.push_back(row);
            while rows.len() > snapshot.max_buffered {
                rows.pop_front();
            }

            write_snapshot(&snapshot.path, rows.iter())
        })
        .await;

        match result {
            Ok(Ok(written)) => {
                tracing::debug!(id, written, path = ?self.path, "snapshot rewritten");
            }
            Ok(Err(err)) => {
                tracing::warn!(id, path = ?self.path, "failed to rewrite snapshot: {err:#}");
            }
            Err(err) => {
                tracing::error!(id, "snapshot task failed: {err}");
            }
        }
    }
}
