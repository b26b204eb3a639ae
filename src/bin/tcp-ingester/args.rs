use std::{net::SocketAddr, path::PathBuf, time::Duration};

use barn_telemetry::config::{FeedConfig, SessionConfig, SnapshotConfig, SupervisorConfig};
use chrono_tz::Tz;
use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8889")]
    pub listen: SocketAddr,

    #[arg(long, env = "DATABASE_URL", required_unless_present = "in_memory")]
    pub database_url: Option<String>,

    /// Keep readings in process memory instead of PostgreSQL.
    #[arg(long)]
    pub in_memory: bool,

    /// Create the readings table if it is missing.
    #[arg(long)]
    pub ensure_schema: bool,

    #[arg(long, env = "TZ", default_value = "UTC")]
    pub timezone: Tz,

    #[arg(long, default_value_t = 20)]
    pub grace_secs: u64,

    #[arg(long, default_value_t = 25)]
    pub timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub store_timeout_secs: u64,

    #[arg(long, default_value_t = 65536)]
    pub read_buffer: usize,

    /// 0 disables the cap.
    #[arg(long, default_value_t = 256)]
    pub max_sessions: usize,

    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    #[arg(long, default_value_t = 100_000)]
    pub snapshot_rows: usize,

    #[arg(long, default_value_t = 10)]
    pub page_size: i64,

    #[arg(long, default_value_t = 2)]
    pub poll_secs: u64,

    /// Subscribers that stay full this long are dropped.
    #[arg(long, default_value_t = 5)]
    pub delivery_timeout_secs: u64,
}

impl Args {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            session: SessionConfig {
                grace: Duration::from_secs(self.grace_secs),
                timeout: Duration::from_secs(self.timeout_secs),
                store_timeout: Duration::from_secs(self.store_timeout_secs),
                read_buffer: self.read_buffer,
                timezone: self.timezone,
                ..SessionConfig::default()
            },
            max_sessions: (self.max_sessions > 0).then_some(self.max_sessions),
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            page_size: self.page_size,
            poll_interval: Duration::from_secs(self.poll_secs),
            delivery_timeout: Duration::from_secs(self.delivery_timeout_secs),
            ..FeedConfig::default()
        }
    }

    pub fn snapshot_config(&self) -> Option<SnapshotConfig> {
        self.snapshot.as_ref().map(|path| SnapshotConfig {
            path: path.clone(),
            max_buffered: self.snapshot_rows,
        })
    }
}
