use std::fmt;

/// The five environmental quantities every field node reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    Illumination,
    Ammonia,
    HydrogenSulfide,
    Humidity,
    Temperature,
}

impl Measurement {
    pub const ALL: [Measurement; 5] = [
        Measurement::Illumination,
        Measurement::Ammonia,
        Measurement::HydrogenSulfide,
        Measurement::Humidity,
        Measurement::Temperature,
    ];

    /// Canonical name, also used as the storage column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Measurement::Illumination => "illumination",
            Measurement::Ammonia => "ammonia",
            Measurement::HydrogenSulfide => "hydrogen_sulfide",
            Measurement::Humidity => "humidity",
            Measurement::Temperature => "temperature",
        }
    }

    /// Key the device firmware uses in its JSON payload.
    pub fn wire_key(&self) -> &'static str {
        match self {
            Measurement::Illumination => "LUX",
            Measurement::Ammonia => "NH3",
            Measurement::HydrogenSulfide => "HS",
            Measurement::Humidity => "H",
            Measurement::Temperature => "T",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Measurement::Illumination => "lux",
            Measurement::Ammonia => "ppm",
            Measurement::HydrogenSulfide => "ppm",
            Measurement::Humidity => "%",
            Measurement::Temperature => "°C",
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
