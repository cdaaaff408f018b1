use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::SensorKind;
use crate::error::ConfigError;
use crate::transport::QoS;

/// Process-wide configuration shared by the sensor and alert processes
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub broker_address: String,

    /// Seconds a publish waits for the broker acknowledgement
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,

    #[serde(default)]
    pub topics: TopicsConfig,

    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    #[serde(default)]
    pub acquirer: AcquirerConfig,
}

impl AppConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Path prefix of measurement topics
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub alert_manager: AlertManagerTopics,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            alert_manager: AlertManagerTopics::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertManagerTopics {
    /// Filter the alert manager subscribes to, `<namespace>/+` when unset
    pub subscribe: Option<String>,

    /// Prefix concatenated with the airport code to form alert topics
    #[serde(default = "default_alert_prefix")]
    pub publish: String,
}

impl TopicsConfig {
    pub fn subscribe_filter(&self) -> String {
        self.alert_manager
            .subscribe
            .clone()
            .unwrap_or_else(|| format!("{}/+", self.namespace))
    }

    pub fn alert_prefix(&self) -> &str {
        &self.alert_manager.publish
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_thresholds_path")]
    pub path: PathBuf,

    /// Re-read the threshold file for every evaluated message
    #[serde(default = "default_reload")]
    pub reload_on_every_call: bool,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            path: default_thresholds_path(),
            reload_on_every_call: default_reload(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcquirerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl AcquirerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AcquirerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ack_timeout_secs() -> u64 {
    10
}

fn default_namespace() -> String {
    String::from("airport")
}

// alert topics carry their own separator
fn default_alert_prefix() -> String {
    String::from("alert/")
}

fn default_thresholds_path() -> PathBuf {
    PathBuf::from("config/threshold_config.toml")
}

fn default_reload() -> bool {
    true
}

fn default_base_url() -> String {
    String::from("https://public-api.meteofrance.fr/public/DPObs/v1")
}

fn default_timeout_secs() -> u64 {
    10
}

/// One producing sensor, owned by exactly one sensor runtime
#[derive(Debug, Clone, Deserialize)]
pub struct SensorDescriptor {
    /// Transport identity, also encodes the sensor kind (`wind_sensor_...`)
    pub client_id: String,

    pub airport_iata: String,

    /// Weather station identifier at the upstream provider
    pub geo_id_insee: String,

    #[serde(default)]
    pub qos: QoS,

    /// Publish interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default)]
    pub retain: bool,
}

fn default_interval() -> u64 {
    15
}

impl SensorDescriptor {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Kind derived from the client identity. Validated descriptors always
    /// have one.
    pub fn kind(&self) -> Option<SensorKind> {
        SensorKind::from_client_identity(&self.client_id)
    }

    pub fn validate(&self) -> Result<SensorKind, ConfigError> {
        let Some(kind) = self.kind() else {
            return Err(ConfigError::Invalid(format!(
                "{}: client id does not name a sensor kind",
                self.client_id
            )));
        };

        if self.interval == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: interval must be at least one second",
                self.client_id
            )));
        }

        if self.airport_iata.is_empty() || self.airport_iata.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "{}: invalid airport code {:?}",
                self.client_id, self.airport_iata
            )));
        }

        Ok(kind)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorsFile {
    #[serde(default)]
    pub sensors: Vec<SensorDescriptor>,
}

pub(crate) fn read_toml<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_app_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let config: AppConfig = read_toml(path, &read_file(path)?)?;

    if config.broker_address.is_empty() {
        return Err(ConfigError::Invalid("broker_address is empty".to_string()));
    }

    trace!("loaded app config: {config:?}");
    Ok(config)
}

/// Load and validate every sensor descriptor, in file order.
pub fn read_sensor_configs(path: impl AsRef<Path>) -> Result<Vec<SensorDescriptor>, ConfigError> {
    let path = path.as_ref();
    let file: SensorsFile = read_toml(path, &read_file(path)?)?;

    for descriptor in &file.sensors {
        descriptor.validate()?;
    }

    trace!("loaded {} sensor descriptor(s)", file.sensors.len());
    Ok(file.sensors)
}
