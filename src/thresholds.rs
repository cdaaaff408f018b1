//! Alert thresholds and the band rules applied to each reading
//!
//! ## Rules
//!
//! ```text
//! temperature: alert iff value < min || value > max
//! wind:        alert iff value > speed
//! pressure:    band = summer (March..=September) or winter, then as temperature
//! ```
//!
//! Bounds are open: a value equal to a bound never alerts. The season comes
//! from the reading's own timestamp, never from the arrival time.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::config::read_toml;
use crate::error::ConfigError;
use crate::{Season, SensorKind};

/// An acceptable `[min, max]` range
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        !(value < self.min || value > self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WindLimit {
    /// Maximum tolerated wind speed, in m/s
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PressureBands {
    pub summer: Band,
    pub winter: Band,
}

impl PressureBands {
    pub fn for_season(&self, season: Season) -> Band {
        match season {
            Season::Summer => self.summer,
            Season::Winter => self.winter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ThresholdSet {
    #[serde(alias = "temp")]
    pub temperature: Band,
    pub wind: WindLimit,
    pub pressure: PressureBands,
}

/// The limit a reading was found to violate
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    Temperature { value: f64, band: Band },
    Wind { value: f64, max_speed: f64 },
    Pressure { value: f64, band: Band, season: Season },
}

impl Violation {
    /// Human-readable alert text
    pub fn describe(&self) -> String {
        match self {
            Violation::Temperature { value, band } => format!(
                "Alert: Temperature ({value:.6}) exceeded threshold ({:.6}-{:.6})",
                band.min, band.max
            ),
            Violation::Wind { value, max_speed } => {
                format!("Alert: Wind ({value:.6}) exceeded threshold ({max_speed:.6})")
            }
            Violation::Pressure { value, band, .. } => format!(
                "Alert: Pressure ({value:.6}) exceeded threshold ({:.6}-{:.6})",
                band.min, band.max
            ),
        }
    }
}

impl ThresholdSet {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bands = [
            ("temperature", self.temperature),
            ("pressure.summer", self.pressure.summer),
            ("pressure.winter", self.pressure.winter),
        ];

        for (name, band) in bands {
            if band.min > band.max {
                return Err(ConfigError::Invalid(format!(
                    "{name}: min {} is greater than max {}",
                    band.min, band.max
                )));
            }
        }

        Ok(())
    }

    /// Decide whether a reading violates its limit.
    pub fn check(
        &self,
        kind: SensorKind,
        observed_at: &NaiveDateTime,
        value: f64,
    ) -> Option<Violation> {
        match kind {
            SensorKind::Temperature => {
                (!self.temperature.contains(value)).then_some(Violation::Temperature {
                    value,
                    band: self.temperature,
                })
            }
            SensorKind::Wind => (value > self.wind.speed).then_some(Violation::Wind {
                value,
                max_speed: self.wind.speed,
            }),
            SensorKind::Pressure => {
                let season = Season::of(observed_at);
                let band = self.pressure.for_season(season);
                trace!("pressure reading falls in {season} band {band:?}");
                (!band.contains(value)).then_some(Violation::Pressure {
                    value,
                    band,
                    season,
                })
            }
        }
    }
}

/// Read-through source of [`ThresholdSet`]s backed by a TOML file
///
/// With `reload_on_every_call` every [`ThresholdStore::load`] re-reads the
/// file so edits apply to the next message without a restart. Otherwise the
/// first successful load is kept for the lifetime of the store.
pub struct ThresholdStore {
    path: PathBuf,
    reload_on_every_call: bool,
    cached: RwLock<Option<Arc<ThresholdSet>>>,
}

impl ThresholdStore {
    pub fn new(path: impl Into<PathBuf>, reload_on_every_call: bool) -> Self {
        Self {
            path: path.into(),
            reload_on_every_call,
            cached: RwLock::new(None),
        }
    }

    pub async fn load(&self) -> Result<Arc<ThresholdSet>, ConfigError> {
        if self.reload_on_every_call {
            return self.read().await.map(Arc::new);
        }

        if let Some(cached) = self.cached.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let mut cached = self.cached.write().await;
        if let Some(existing) = cached.as_ref() {
            return Ok(existing.clone());
        }

        let thresholds = Arc::new(self.read().await?);
        *cached = Some(thresholds.clone());
        Ok(thresholds)
    }

    async fn read(&self) -> Result<ThresholdSet, ConfigError> {
        let content =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })?;

        let thresholds: ThresholdSet = read_toml(&self.path, &content)?;
        thresholds.validate()?;

        debug!("loaded thresholds from {}", self.path.display());
        Ok(thresholds)
    }
}
