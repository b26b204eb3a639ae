//! Change feed over the append-only readings relation.
//!
//! The store offers no change notification, so the feed polls for rows above
//! a watermark. Each poll takes at most one page, newest first; when more rows
//! than a page arrive between two polls, the oldest of that burst are skipped
//! rather than queued.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::{
    sync::{
        mpsc::{self, error::SendTimeoutError},
        watch,
    },
    time::sleep,
};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    config::FeedConfig,
    store::{ReadingStore, StorageError, Watermark},
    telemetry::PersistedRow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Polling,
    Delivering,
}

/// Receiving end of the feed for one consumer.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<PersistedRow>,
}

impl Subscription {
    /// Next row, or `None` once the feed has stopped.
    pub async fn recv(&mut self) -> Option<PersistedRow> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PersistedRow> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<PersistedRow> {
        ReceiverStream::new(self.rx)
    }
}

pub struct ChangeFeed {
    store: Arc<dyn ReadingStore>,
    config: FeedConfig,
    watermark: Watermark,
    state: FeedState,
    subscribers: Vec<mpsc::Sender<PersistedRow>>,
}

impl ChangeFeed {
    pub fn new(store: Arc<dyn ReadingStore>, config: FeedConfig) -> Self {
        Self {
            store,
            config,
            watermark: Watermark::ORIGIN,
            state: FeedState::Idle,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.subscriber_capacity.max(1));
        self.subscribers.push(tx);
        Subscription { rx }
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Runs one poll cycle and returns how many rows were delivered.
    ///
    /// On a storage error nothing is delivered and the watermark stays put.
    /// Rows go out oldest first; the watermark moves only after the whole page
    /// has reached every subscriber that is still keeping up.
    pub async fn poll_once(&mut self) -> Result<usize, StorageError> {
        self.state = FeedState::Polling;
        let page = self
            .store
            .fetch_after(self.watermark, self.config.page_size)
            .await;
        self.state = FeedState::Idle;

        let mut fresh: IndexMap<i64, PersistedRow> = IndexMap::new();
        for row in page? {
            if row.id > self.watermark.id() {
                fresh.entry(row.id).or_insert(row);
            }
        }

        let Some(&newest) = fresh.keys().max() else {
            return Ok(0);
        };

        self.state = FeedState::Delivering;
        fresh.sort_keys();
        let delivered = fresh.len();
        for row in fresh.into_values() {
            self.deliver(row).await;
        }
        self.watermark.advance(newest);
        self.state = FeedState::Idle;

        tracing::debug!(delivered, watermark = newest, "page delivered");
        Ok(delivered)
    }

    /// Polls until `shutdown` turns true or its sender is dropped.
    ///
    /// Shutdown is only observed between cycles, never while a page is being
    /// delivered; stalled subscribers are dropped after the delivery timeout,
    /// so a page always finishes. A full page is followed by another poll right
    /// away; an empty or failed one waits for the poll interval.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            page_size = self.config.page_size,
            poll_interval = ?self.config.poll_interval,
            "change feed started"
        );

        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(0) => true,
                Ok(_) => false,
                Err(err) => {
                    tracing::warn!(
                        watermark = self.watermark.id(),
                        "poll failed, retrying next cycle: {err}"
                    );
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(watermark = self.watermark.id(), "change feed stopped");
    }

    // A subscriber that stays full past the delivery timeout is dropped, so one
    // stalled consumer cannot hold up the others or shutdown.
    async fn deliver(&mut self, row: PersistedRow) {
        let mut open = Vec::with_capacity(self.subscribers.len());
        for tx in self.subscribers.drain(..) {
            match tx
                .send_timeout(row.clone(), self.config.delivery_timeout)
                .await
            {
                Ok(()) => open.push(tx),
                Err(SendTimeoutError::Timeout(_)) => tracing::warn!(
                    id = row.id,
                    timeout = ?self.config.delivery_timeout,
                    "subscriber stalled, dropping it"
                ),
                Err(SendTimeoutError::Closed(_)) => tracing::debug!("subscriber went away"),
            }
        }
        self.subscribers = open;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::{
        store::MemoryStore,
        telemetry::{PersistedRow, Reading},
    };

    fn reading(device_id: &str) -> Reading {
        Reading {
            device_id: device_id.to_owned(),
            source_address: "10.0.0.5".to_owned(),
            illumination: 120.5,
            ammonia: 8.0,
            hydrogen_sulfide: 50.0,
            humidity: 65.0,
            temperature: 24.0,
            observed_at: Utc::now().with_timezone(&chrono_tz::UTC),
        }
    }

    async fn insert_many(store: &MemoryStore, n: usize) {
        for i in 0..n {
            store.insert(&reading(&format!("ESP{i}"))).await.unwrap();
        }
    }

    fn drain(subscription: &mut Subscription) -> Vec<i64> {
        std::iter::from_fn(|| subscription.try_recv())
            .map(|row| row.id)
            .collect()
    }

    /// Fails the first `failures` fetches, then defers to a memory store.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl ReadingStore for FlakyStore {
        async fn insert(&self, reading: &Reading) -> Result<PersistedRow, StorageError> {
            self.inner.insert(reading).await
        }

        async fn fetch_after(
            &self,
            after: Watermark,
            limit: i64,
        ) -> Result<Vec<PersistedRow>, StorageError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Unavailable("connection lost".to_owned()));
            }
            self.inner.fetch_after(after, limit).await
        }
    }

    /// Returns every row twice, as a join gone wrong would.
    struct DuplicatingStore(MemoryStore);

    #[async_trait]
    impl ReadingStore for DuplicatingStore {
        async fn insert(&self, reading: &Reading) -> Result<PersistedRow, StorageError> {
            self.0.insert(reading).await
        }

        async fn fetch_after(
            &self,
            after: Watermark,
            limit: i64,
        ) -> Result<Vec<PersistedRow>, StorageError> {
            let rows = self.0.fetch_after(after, limit).await?;
            Ok(rows.iter().flat_map(|r| [r.clone(), r.clone()]).collect())
        }
    }

    #[tokio::test]
    async fn delivers_each_row_once_oldest_first() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = ChangeFeed::new(store.clone(), FeedConfig::default());
        let mut subscription = feed.subscribe();
        insert_many(&store, 3).await;

        assert_eq!(feed.poll_once().await.unwrap(), 3);
        assert_eq!(drain(&mut subscription), vec![1, 2, 3]);
        assert_eq!(feed.watermark().id(), 3);

        // Nothing new: a second cycle is a no-op.
        assert_eq!(feed.poll_once().await.unwrap(), 0);
        assert!(drain(&mut subscription).is_empty());
        assert_eq!(feed.watermark().id(), 3);
        assert_eq!(feed.state(), FeedState::Idle);
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_row() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = ChangeFeed::new(store.clone(), FeedConfig::default());
        let mut dashboard = feed.subscribe();
        let mut alerting = feed.subscribe();
        insert_many(&store, 2).await;

        feed.poll_once().await.unwrap();

        assert_eq!(drain(&mut dashboard), vec![1, 2]);
        assert_eq!(drain(&mut alerting), vec![1, 2]);
    }

    #[tokio::test]
    async fn burst_larger_than_page_skips_oldest() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = ChangeFeed::new(store.clone(), FeedConfig::default());
        let mut subscription = feed.subscribe();
        insert_many(&store, 11).await;

        assert_eq!(feed.poll_once().await.unwrap(), 10);
        assert_eq!(drain(&mut subscription), (2..=11).collect::<Vec<i64>>());
        assert_eq!(feed.watermark().id(), 11);

        // Row 1 is behind the watermark now and is never delivered.
        assert_eq!(feed.poll_once().await.unwrap(), 0);
        assert!(drain(&mut subscription).is_empty());
    }

    #[tokio::test]
    async fn failed_poll_keeps_watermark_and_retries() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(0),
        });
        let mut feed = ChangeFeed::new(store.clone(), FeedConfig::default());
        let mut subscription = feed.subscribe();

        store.insert(&reading("ESP1")).await.unwrap();
        feed.poll_once().await.unwrap();
        assert_eq!(feed.watermark().id(), 1);

        store.insert(&reading("ESP2")).await.unwrap();
        store.failures.store(1, Ordering::SeqCst);

        assert!(feed.poll_once().await.is_err());
        assert_eq!(feed.watermark().id(), 1);
        assert_eq!(feed.state(), FeedState::Idle);

        assert_eq!(feed.poll_once().await.unwrap(), 1);
        assert_eq!(drain(&mut subscription), vec![1, 2]);
        assert_eq!(feed.watermark().id(), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_in_page_are_delivered_once() {
        let store = Arc::new(DuplicatingStore(MemoryStore::new()));
        let mut feed = ChangeFeed::new(store.clone(), FeedConfig::default());
        let mut subscription = feed.subscribe();
        for device in ["ESP1", "ESP2"] {
            store.insert(&reading(device)).await.unwrap();
        }

        assert_eq!(feed.poll_once().await.unwrap(), 2);
        assert_eq!(drain(&mut subscription), vec![1, 2]);
    }

    #[tokio::test]
    async fn watermark_never_decreases() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = ChangeFeed::new(store.clone(), FeedConfig::default());
        let mut previous = feed.watermark();
        assert_eq!(previous, Watermark::ORIGIN);

        for burst in [0, 4, 0, 12, 1, 0, 3] {
            insert_many(&store, burst).await;
            feed.poll_once().await.unwrap();
            assert!(feed.watermark() >= previous);
            previous = feed.watermark();
        }

        assert_eq!(previous.id(), 20);
    }

    #[tokio::test]
    async fn closed_subscribers_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = ChangeFeed::new(store.clone(), FeedConfig::default());
        let gone = feed.subscribe();
        let mut kept = feed.subscribe();
        drop(gone);
        insert_many(&store, 2).await;

        assert_eq!(feed.poll_once().await.unwrap(), 2);
        assert_eq!(drain(&mut kept), vec![1, 2]);
        assert_eq!(feed.subscribers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_is_dropped_without_blocking_others() {
        let store = Arc::new(MemoryStore::new());
        let config = FeedConfig {
            subscriber_capacity: 1,
            ..FeedConfig::default()
        };
        let mut feed = ChangeFeed::new(store.clone(), config);
        let _stalled = feed.subscribe();
        let mut live = feed.subscribe();
        insert_many(&store, 3).await;

        let reader = tokio::spawn(async move {
            let mut ids = Vec::new();
            while ids.len() < 3 {
                ids.push(live.recv().await.unwrap().id);
            }
            ids
        });

        let started = tokio::time::Instant::now();
        assert_eq!(feed.poll_once().await.unwrap(), 3);

        assert_eq!(reader.await.unwrap(), vec![1, 2, 3]);
        assert_eq!(feed.subscribers.len(), 1);
        assert_eq!(feed.watermark().id(), 3);
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_does_not_block_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let config = FeedConfig {
            subscriber_capacity: 1,
            ..FeedConfig::default()
        };
        let mut feed = ChangeFeed::new(store.clone(), config);
        let _stalled = feed.subscribe();
        insert_many(&store, 3).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(feed.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .expect("feed did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn subscription_streams_rows_until_feed_is_dropped() {
        use tokio_stream::StreamExt as _;

        let store = Arc::new(MemoryStore::new());
        let mut feed = ChangeFeed::new(store.clone(), FeedConfig::default());
        let subscription = feed.subscribe();
        insert_many(&store, 3).await;
        feed.poll_once().await.unwrap();
        drop(feed);

        let ids: Vec<i64> = subscription.into_stream().map(|row| row.id).collect().await;

        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_delivers_new_rows_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let config = FeedConfig {
            poll_interval: Duration::from_secs(2),
            ..FeedConfig::default()
        };
        let mut feed = ChangeFeed::new(store.clone(), config);
        let mut subscription = feed.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(feed.run(shutdown_rx));

        store.insert(&reading("ESP1")).await.unwrap();
        assert_eq!(subscription.recv().await.unwrap().id, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        store.insert(&reading("ESP2")).await.unwrap();
        assert_eq!(subscription.recv().await.unwrap().id, 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(subscription.recv().await.is_none());
    }
}
