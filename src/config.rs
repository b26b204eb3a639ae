use std::{path::PathBuf, time::Duration};

use chrono_tz::Tz;

/// Byte the server sends right after accept to prompt the device.
pub const READY_MARKER: u8 = b'a';

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed wait between the ready marker and the read.
    pub grace: Duration,

    /// Bound on the greeting, grace wait and read, measured from accept.
    pub timeout: Duration,

    /// Bound on storing a decoded reading. A session lives at most
    /// `timeout + store_timeout`.
    pub store_timeout: Duration,

    /// Upper bound on bytes taken from the single read.
    pub read_buffer: usize,

    pub ready_marker: u8,

    /// Zone `observed_at` is stamped in.
    pub timezone: Tz,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(20),
            timeout: Duration::from_secs(25),
            store_timeout: Duration::from_secs(10),
            read_buffer: 65536,
            ready_marker: READY_MARKER,
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub session: SessionConfig,

    /// `None` leaves concurrent sessions unbounded.
    pub max_sessions: Option<usize>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            max_sessions: Some(256),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Rows fetched per poll. Bursts larger than this lose their oldest rows.
    pub page_size: i64,

    pub poll_interval: Duration,

    /// Buffered rows per subscriber before delivery waits on it.
    pub subscriber_capacity: usize,

    /// How long delivery waits on a full subscriber before dropping it.
    pub delivery_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            poll_interval: Duration::from_secs(2),
            subscriber_capacity: 64,
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub path: PathBuf,

    /// Oldest readings are dropped from the snapshot beyond this many.
    pub max_buffered: usize,
}

impl SnapshotConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_buffered: 100_000,
        }
    }
}
