//! Durable storage for readings.
//!
//! The relation is append-only: writers insert, readers select. The only
//! order the rest of the crate relies on is the store-assigned row id.

mod memory;

pub use memory::*;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::telemetry::{PersistedRow, Reading};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store did not answer within {0:?}")]
    TimedOut(Duration),
}

/// Highest row id already delivered by the change feed. Never persisted; a
/// restart starts over from [`Watermark::ORIGIN`] and re-delivers the most
/// recent page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(i64);

impl Watermark {
    pub const ORIGIN: Watermark = Watermark(i64::MIN);

    pub(crate) fn at(id: i64) -> Self {
        Self(id)
    }

    pub fn id(self) -> i64 {
        self.0
    }

    pub(crate) fn advance(&mut self, id: i64) {
        self.0 = self.0.max(id);
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::ORIGIN
    }
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Appends a reading and returns it with its newly assigned id.
    async fn insert(&self, reading: &Reading) -> Result<PersistedRow, StorageError>;

    /// Returns up to `limit` rows newer than `after`, newest first.
    async fn fetch_after(
        &self,
        after: Watermark,
        limit: i64,
    ) -> Result<Vec<PersistedRow>, StorageError>;
}
