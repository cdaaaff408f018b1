//! Measurement acquisition from the upstream weather provider
//!
//! The sensor runtime only depends on [`MeasurementAcquirer`]; the
//! [`MeteoFranceAcquirer`] is the production implementation, querying the
//! Météo-France station observation API (six-minute infra-hourly data).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{instrument, trace};

use crate::config::{AcquirerConfig, SensorDescriptor};
use crate::error::AcquisitionError;
use crate::{Measurement, SensorKind};

const KELVIN_OFFSET: f64 = 273.15;

const API_KEY_VAR: &str = "METEO_FRANCE_API_KEY";

/// Turns a sensor descriptor into one current measurement
#[async_trait]
pub trait MeasurementAcquirer: Send + Sync {
    async fn fetch(&self, sensor: &SensorDescriptor) -> Result<Measurement, AcquisitionError>;
}

/// One observation as returned by the station endpoint
#[derive(Debug, Clone, Deserialize)]
struct StationObservation {
    reference_time: DateTime<Utc>,
    /// Air temperature, Kelvin
    t: Option<f64>,
    /// Mean wind speed, m/s
    ff: Option<f64>,
    /// Station pressure, Pa
    pres: Option<f64>,
}

/// Convert a UTC instant to the UTC+1 civil time carried on the wire.
pub fn to_utc_plus_one(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.naive_utc() + TimeDelta::hours(1)
}

#[derive(Debug, Clone)]
pub struct MeteoFranceAcquirer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl MeteoFranceAcquirer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AcquisitionError::Unreachable(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build from configuration, taking the API key from the environment.
    pub fn from_config(config: &AcquirerConfig) -> Result<Self, AcquisitionError> {
        Self::new(
            config.base_url.clone(),
            std::env::var(API_KEY_VAR).ok(),
            config.timeout(),
        )
    }

    fn measurement_from(
        sensor: &SensorDescriptor,
        kind: SensorKind,
        observation: StationObservation,
    ) -> Result<Measurement, AcquisitionError> {
        let (field, value) = match kind {
            SensorKind::Temperature => ("t", observation.t.map(|k| k - KELVIN_OFFSET)),
            SensorKind::Wind => ("ff", observation.ff),
            SensorKind::Pressure => ("pres", observation.pres.map(|pa| pa / 100.0)),
        };

        let value = value.ok_or_else(|| {
            AcquisitionError::MalformedResponse(format!("observation has no {field} field"))
        })?;

        Ok(Measurement {
            kind,
            airport_code: sensor.airport_iata.clone(),
            value,
            observed_at: to_utc_plus_one(observation.reference_time),
        })
    }
}

#[async_trait]
impl MeasurementAcquirer for MeteoFranceAcquirer {
    #[instrument(skip_all, fields(station = %sensor.geo_id_insee))]
    async fn fetch(&self, sensor: &SensorDescriptor) -> Result<Measurement, AcquisitionError> {
        let kind = sensor.kind().ok_or_else(|| {
            AcquisitionError::MalformedResponse(format!(
                "{} does not name a sensor kind",
                sensor.client_id
            ))
        })?;

        let url = format!("{}/station/infrahoraire-6m", self.base_url);
        trace!("requesting observation from {url}");

        let mut request = self
            .client
            .get(&url)
            .query(&[("id_station", sensor.geo_id_insee.as_str()), ("format", "json")])
            .header("accept", "*/*");

        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AcquisitionError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AcquisitionError::Unreachable(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AcquisitionError::Unreachable(format!("failed to read body: {e}")))?;

        let observations: Vec<StationObservation> = serde_json::from_str(&body)
            .map_err(|e| AcquisitionError::MalformedResponse(e.to_string()))?;

        let observation = observations
            .into_iter()
            .next()
            .ok_or(AcquisitionError::EmptyResponse)?;

        Self::measurement_from(sensor, kind, observation)
    }
}
