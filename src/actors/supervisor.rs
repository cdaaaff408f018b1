//! SensorSupervisor - Runs a fleet of sensor runtimes
//!
//! The supervisor opens one connection per sensor, spawns one runtime per
//! connected sensor and owns the single cancellation token they share.
//!
//! ## Failure Policy
//!
//! A sensor whose connection cannot be opened is logged and skipped; the rest
//! of the fleet starts regardless.
//!
//! ## Shutdown
//!
//! ```text
//! shutdown signal → cancel token → runtimes stop → join (bounded) → disconnect
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::acquirer::MeasurementAcquirer;
use crate::config::SensorDescriptor;
use crate::transport::Connector;

use super::messages::SensorState;
use super::sensor::{RuntimeSettings, SensorHandle};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct SensorSupervisor {
    connector: Arc<dyn Connector>,
    acquirer: Arc<dyn MeasurementAcquirer>,
    settings: RuntimeSettings,
    grace: Duration,
}

impl SensorSupervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        acquirer: Arc<dyn MeasurementAcquirer>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            connector,
            acquirer,
            settings,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Connect and spawn a runtime for every descriptor, in order.
    #[instrument(skip_all, fields(sensors = descriptors.len()))]
    pub async fn start(&self, descriptors: Vec<SensorDescriptor>) -> SupervisorHandle {
        let cancel = CancellationToken::new();
        let mut sensors = vec![];
        let mut skipped = vec![];

        for descriptor in descriptors {
            if let Err(e) = descriptor.validate() {
                error!("skipping sensor: {e}");
                skipped.push(descriptor.client_id);
                continue;
            }

            let transport = match self.connector.connect(&descriptor.client_id).await {
                Ok(transport) => transport,
                Err(e) => {
                    error!("skipping sensor {}: {e}", descriptor.client_id);
                    skipped.push(descriptor.client_id);
                    continue;
                }
            };

            debug!("spawning runtime for {}", descriptor.client_id);
            sensors.push(SensorHandle::spawn(
                descriptor,
                transport,
                self.acquirer.clone(),
                self.settings.clone(),
                cancel.child_token(),
            ));
        }

        info!(
            "{} sensor(s) running, {} skipped",
            sensors.len(),
            skipped.len()
        );

        SupervisorHandle {
            cancel,
            sensors,
            skipped,
            grace: self.grace,
        }
    }

    /// Start every sensor, block until `shutdown` resolves, then stop them.
    pub async fn run_until<F>(&self, descriptors: Vec<SensorDescriptor>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let handle = self.start(descriptors).await;
        shutdown.await;
        info!("shutdown requested");
        handle.shutdown().await;
    }
}

/// Running fleet of sensors
pub struct SupervisorHandle {
    cancel: CancellationToken,
    sensors: Vec<SensorHandle>,
    skipped: Vec<String>,
    grace: Duration,
}

impl SupervisorHandle {
    /// Identities of the running sensors, in start order
    pub fn running(&self) -> Vec<&str> {
        self.sensors.iter().map(|s| s.client_id.as_str()).collect()
    }

    /// Identities of sensors that could not be started
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn states(&self) -> Vec<(&str, SensorState)> {
        self.sensors
            .iter()
            .map(|s| (s.client_id.as_str(), s.state()))
            .collect()
    }

    /// Cancel every runtime and wait for them within the grace period.
    ///
    /// Returns the number of runtimes that stopped on their own.
    pub async fn shutdown(self) -> usize {
        self.cancel.cancel();

        let grace = self.grace;
        let stopped = join_all(self.sensors.into_iter().map(|s| s.finish(grace)))
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count();

        info!("{stopped} sensor runtime(s) stopped");
        stopped
    }
}
