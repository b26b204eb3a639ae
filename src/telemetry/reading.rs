use chrono::DateTime;
use chrono_tz::Tz;

use crate::telemetry::Measurement;

/// One telemetry sample as accepted from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: String,

    /// Peer address of the connection the reading arrived on.
    pub source_address: String,

    pub illumination: f64,

    pub ammonia: f64,

    pub hydrogen_sulfide: f64,

    pub humidity: f64,

    pub temperature: f64,

    /// Server receipt time.
    pub observed_at: DateTime<Tz>,
}

impl Reading {
    pub fn value(&self, measurement: Measurement) -> f64 {
        match measurement {
            Measurement::Illumination => self.illumination,
            Measurement::Ammonia => self.ammonia,
            Measurement::HydrogenSulfide => self.hydrogen_sulfide,
            Measurement::Humidity => self.humidity,
            Measurement::Temperature => self.temperature,
        }
    }
}

/// A reading after the store has assigned it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRow {
    pub id: i64,

    pub reading: Reading,
}
