use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    store::{ReadingStore, StorageError, Watermark},
    telemetry::{PersistedRow, Reading},
};

/// Process-local store with the same id semantics as the database: ids start
/// at 1 and increase by one per insert.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<PersistedRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<PersistedRow> {
        match self.rows.lock() {
            Ok(rows) => rows.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert(&self, reading: &Reading) -> Result<PersistedRow, StorageError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_owned()))?;

        let id = rows.last().map_or(1, |row| row.id + 1);
        let row = PersistedRow {
            id,
            reading: reading.clone(),
        };
        rows.push(row.clone());

        Ok(row)
    }

    async fn fetch_after(
        &self,
        after: Watermark,
        limit: i64,
    ) -> Result<Vec<PersistedRow>, StorageError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_owned()))?;

        let limit = usize::try_from(limit).unwrap_or(0);

        Ok(rows
            .iter()
            .rev()
            .take_while(|row| row.id > after.id())
            .take(limit)
            .cloned()
            .collect())
    }
}
