//! Optimal ranges for a poultry house, used to flag readings worth a look.

use indexmap::IndexMap;
use tokio_stream::StreamExt as _;

use crate::{
    feed::Subscription,
    telemetry::{Measurement, Reading},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimalRange {
    pub min: f64,
    pub max: f64,
}

impl OptimalRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn level(&self, value: f64) -> Level {
        if value < self.min {
            Level::Low
        } else if value > self.max {
            Level::High
        } else {
            Level::Optimal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    Optimal,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub measurement: Measurement,
    pub value: f64,
    pub level: Level,
    pub range: OptimalRange,
}

#[derive(Debug, Clone)]
pub struct Thresholds {
    ranges: IndexMap<Measurement, OptimalRange>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ranges: IndexMap::from([
                (Measurement::Illumination, OptimalRange::new(10.0, 300.0)),
                (Measurement::Ammonia, OptimalRange::new(0.0, 250.0)),
                (Measurement::HydrogenSulfide, OptimalRange::new(0.0, 100.0)),
                (Measurement::Humidity, OptimalRange::new(50.0, 100.0)),
                (Measurement::Temperature, OptimalRange::new(18.0, 40.0)),
            ]),
        }
    }
}

impl Thresholds {
    pub fn set(&mut self, measurement: Measurement, range: OptimalRange) {
        self.ranges.insert(measurement, range);
    }

    pub fn range(&self, measurement: Measurement) -> Option<OptimalRange> {
        self.ranges.get(&measurement).copied()
    }

    /// One finding per measurement that has a configured range.
    pub fn assess(&self, reading: &Reading) -> Vec<Finding> {
        self.ranges
            .iter()
            .map(|(&measurement, &range)| {
                let value = reading.value(measurement);
                Finding {
                    measurement,
                    value,
                    level: range.level(value),
                    range,
                }
            })
            .collect()
    }

    pub fn out_of_range(&self, reading: &Reading) -> Vec<Finding> {
        self.assess(reading)
            .into_iter()
            .filter(|f| f.level != Level::Optimal)
            .collect()
    }
}

/// Logs every row the feed delivers, with a warning per out-of-range value.
/// Returns when the feed stops.
pub async fn report_readings(subscription: Subscription, thresholds: Thresholds) {
    let mut rows = subscription.into_stream();
    while let Some(row) = rows.next().await {
        let reading = &row.reading;
        tracing::info!(
            id = row.id,
            device_id = %reading.device_id,
            source_address = %reading.source_address,
            illumination = reading.illumination,
            ammonia = reading.ammonia,
            hydrogen_sulfide = reading.hydrogen_sulfide,
            humidity = reading.humidity,
            temperature = reading.temperature,
            observed_at = %reading.observed_at,
            "new reading"
        );

        for finding in thresholds.out_of_range(reading) {
            tracing::warn!(
                id = row.id,
                device_id = %reading.device_id,
                measurement = %finding.measurement,
                level = ?finding.level,
                "{} {} outside {}..{}",
                finding.value,
                finding.measurement.unit(),
                finding.range.min,
                finding.range.max
            );
        }
    }
}
