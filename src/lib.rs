pub mod acquirer;
pub mod actors;
pub mod config;
pub mod error;
pub mod thresholds;
pub mod transport;
pub mod wire;

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDateTime};

use crate::error::UnknownKindError;

/// The kinds of readings an airport sensor can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Wind,
    Pressure,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Temperature,
        SensorKind::Wind,
        SensorKind::Pressure,
    ];

    /// Wire name of the kind, as it appears in payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Wind => "wind",
            SensorKind::Pressure => "pressure",
        }
    }

    /// Derive the kind from a client identity such as `wind_sensor_nte`.
    pub fn from_client_identity(identity: &str) -> Option<SensorKind> {
        SensorKind::ALL
            .into_iter()
            .find(|kind| identity.starts_with(&format!("{}_sensor", kind.as_str())))
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = UnknownKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(SensorKind::Temperature),
            "wind" => Ok(SensorKind::Wind),
            "pressure" => Ok(SensorKind::Pressure),
            other => Err(UnknownKindError(other.to_string())),
        }
    }
}

/// A single reading taken by one sensor.
///
/// `observed_at` is civil time at a fixed UTC+1 offset, without zone
/// information, exactly as it travels on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub kind: SensorKind,
    pub airport_code: String,
    pub value: f64,
    pub observed_at: NaiveDateTime,
}

/// Pressure banding season, derived from the month of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    /// March to September, inclusive
    Summer,
    Winter,
}

impl Season {
    pub fn from_month(month: u32) -> Season {
        if (3..=9).contains(&month) {
            Season::Summer
        } else {
            Season::Winter
        }
    }

    pub fn of(timestamp: &NaiveDateTime) -> Season {
        Season::from_month(timestamp.month())
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Season::Summer => f.write_str("summer"),
            Season::Winter => f.write_str("winter"),
        }
    }
}
