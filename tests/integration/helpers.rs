//! Helper functions for integration tests

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use airport_telemetry::{
    Measurement, SensorKind,
    acquirer::MeasurementAcquirer,
    actors::alert::AlertEvaluator,
    config::SensorDescriptor,
    error::AcquisitionError,
    thresholds::ThresholdStore,
    transport::{QoS, memory::MemoryBroker},
};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

pub const THRESHOLDS: &str = r#"
[temperature]
min = -10.0
max = 40.0

[wind]
speed = 15.0

[pressure.summer]
min = 990.0
max = 1030.0

[pressure.winter]
min = 980.0
max = 1030.0
"#;

/// Write the default thresholds into `dir` and return the file path
pub fn write_thresholds(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("threshold_config.toml");
    std::fs::write(&path, THRESHOLDS).unwrap();
    path
}

/// Evaluator reading thresholds from `dir`, publishing on `broker`
pub fn create_test_evaluator(dir: &tempfile::TempDir, broker: &MemoryBroker) -> Arc<AlertEvaluator> {
    Arc::new(AlertEvaluator::new(
        ThresholdStore::new(write_thresholds(dir), true),
        Arc::new(broker.client("alert_manager")),
        "alert/",
    ))
}

pub fn create_test_descriptor(client_id: &str, airport: &str, interval: u64) -> SensorDescriptor {
    SensorDescriptor {
        client_id: client_id.to_string(),
        airport_iata: airport.to_string(),
        geo_id_insee: "44020001".to_string(),
        qos: QoS::AtLeastOnce,
        interval,
        retain: false,
    }
}

pub fn timestamp(date: &str, time: &str) -> NaiveDateTime {
    let date = date.parse::<NaiveDate>().unwrap();
    NaiveDateTime::new(date, time.parse().unwrap())
}

/// Acquirer replaying scripted values, then repeating the fallback forever
pub struct ScriptedAcquirer {
    script: Mutex<VecDeque<Result<f64, AcquisitionError>>>,
    fallback: f64,
    pub calls: AtomicUsize,
}

impl ScriptedAcquirer {
    pub fn new(script: Vec<Result<f64, AcquisitionError>>, fallback: f64) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeasurementAcquirer for ScriptedAcquirer {
    async fn fetch(&self, sensor: &SensorDescriptor) -> Result<Measurement, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let value = next.unwrap_or(Ok(self.fallback))?;

        Ok(Measurement {
            kind: sensor.kind().unwrap_or(SensorKind::Temperature),
            airport_code: sensor.airport_iata.clone(),
            value,
            observed_at: timestamp("2024-01-16", "12:00:00"),
        })
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn create_mock_observation_json(kelvin: f64, wind: f64, pascal: u32) -> serde_json::Value {
    serde_json::json!([{
        "lat": 47.15,
        "lon": -1.6,
        "geo_id_insee": "44020001",
        "reference_time": "2024-01-16T11:00:00Z",
        "insert_time": "2024-01-16T11:03:00Z",
        "validity_time": "2024-01-16T11:00:00Z",
        "t": kelvin,
        "ff": wind,
        "pres": pascal
    }])
}
