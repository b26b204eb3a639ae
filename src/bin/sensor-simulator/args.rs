use std::net::SocketAddr;

use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:8889")]
    pub server: SocketAddr,

    #[arg(long, default_value = "ESP32-Sensor1")]
    pub device_id: String,

    /// Address the simulated node reports for itself.
    #[arg(long, default_value = "192.168.1.100")]
    pub reported_ip: String,

    /// Stop after this many readings have been sent.
    #[arg(long)]
    pub count: Option<usize>,
}
