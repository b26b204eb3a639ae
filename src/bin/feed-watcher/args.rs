use chrono_tz::Tz;
use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "TZ", default_value = "UTC")]
    pub timezone: Tz,

    #[arg(long, default_value_t = 10)]
    pub page_size: i64,

    #[arg(long, default_value_t = 2)]
    pub poll_secs: u64,

    /// Subscribers that stay full this long are dropped.
    #[arg(long, default_value_t = 5)]
    pub delivery_timeout_secs: u64,
}
