pub mod config;
pub mod db;
pub mod export;
pub mod feed;
pub mod logging;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod thresholds;
pub mod writer;
