//! SensorRuntime - Acquires and publishes one measurement per interval
//!
//! Each configured sensor gets its own runtime and its own transport
//! connection; runtimes share nothing mutable.
//!
//! ## Message Flow
//!
//! ```text
//! Deadline → Acquire (bounded by timeout) → Encode → Publish → [broker]
//!     ↑                                                  │
//!     └──────────────── next aligned deadline ◄──────────┘
//! ```
//!
//! ## Scheduling
//!
//! Deadlines are aligned to multiples of the interval from the moment the
//! runtime starts. A cycle that overruns its interval forfeits the deadlines
//! it missed: the next cycle waits for the next aligned deadline, so a slow
//! upstream never causes catch-up publishes and the schedule never drifts.
//!
//! A failed acquisition abandons the cycle without publishing; there is no
//! retry before the next deadline. Acquisitions are bounded by the configured
//! timeout or by the interval, whichever is shorter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::acquirer::MeasurementAcquirer;
use crate::config::SensorDescriptor;
use crate::error::AcquisitionError;
use crate::transport::Transport;
use crate::wire;

use super::messages::SensorState;

/// Settings shared by every runtime of one supervisor
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Measurement topic namespace
    pub namespace: String,

    /// Upper bound for one acquisition
    pub acquisition_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            namespace: String::from("airport"),
            acquisition_timeout: Duration::from_secs(10),
        }
    }
}

/// Interval deadlines aligned to the start instant
#[derive(Debug, Clone, Copy)]
struct Schedule {
    start: Instant,
    period: Duration,
}

impl Schedule {
    fn new(start: Instant, period: Duration) -> Self {
        Self { start, period }
    }

    /// First deadline strictly after `now`
    fn next_after(&self, now: Instant) -> Instant {
        let period = self.period.as_nanos().max(1);
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        let ticks = elapsed / period + 1;
        let offset = u64::try_from(ticks * period).unwrap_or(u64::MAX);
        self.start + Duration::from_nanos(offset)
    }
}

enum CycleOutcome {
    Published,
    Cancelled,
}

/// Actor driving one sensor
pub struct SensorRuntime {
    descriptor: SensorDescriptor,
    transport: Arc<dyn Transport>,
    acquirer: Arc<dyn MeasurementAcquirer>,
    settings: RuntimeSettings,
    cancel: CancellationToken,
    state_tx: watch::Sender<SensorState>,
}

impl SensorRuntime {
    pub fn new(
        descriptor: SensorDescriptor,
        transport: Arc<dyn Transport>,
        acquirer: Arc<dyn MeasurementAcquirer>,
        settings: RuntimeSettings,
        cancel: CancellationToken,
        state_tx: watch::Sender<SensorState>,
    ) -> Self {
        Self {
            descriptor,
            transport,
            acquirer,
            settings,
            cancel,
            state_tx,
        }
    }

    /// Run until the cancellation token fires
    #[instrument(skip(self), fields(sensor = %self.descriptor.client_id))]
    pub async fn run(self) {
        let period = self.descriptor.interval();
        let schedule = Schedule::new(Instant::now(), period);

        debug!(
            "starting sensor runtime for {} with interval {period:?}",
            self.descriptor.airport_iata
        );

        loop {
            let deadline = schedule.next_after(Instant::now());

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                _ = tokio::time::sleep_until(deadline) => {
                    match self.cycle().await {
                        Ok(CycleOutcome::Published) => {}
                        Ok(CycleOutcome::Cancelled) => break,
                        Err(e) => warn!("cycle skipped: {e:#}"),
                    }
                    self.set_state(SensorState::Idle);
                }
            }
        }

        self.set_state(SensorState::Stopped);
        debug!("sensor runtime stopped");
    }

    fn set_state(&self, state: SensorState) {
        trace!("state → {state:?}");
        self.state_tx.send_replace(state);
    }

    async fn cycle(&self) -> Result<CycleOutcome> {
        self.set_state(SensorState::Acquiring);

        // a hanging upstream may hold the schedule for at most one interval
        let timeout = self
            .settings
            .acquisition_timeout
            .min(self.descriptor.interval());
        let fetched = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => return Ok(CycleOutcome::Cancelled),

            fetched = tokio::time::timeout(timeout, self.acquirer.fetch(&self.descriptor)) => fetched,
        };

        let measurement = fetched
            .unwrap_or(Err(AcquisitionError::Timeout(timeout)))
            .context("failed to acquire measurement")?;

        if self.cancel.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        self.set_state(SensorState::Publishing);

        let topic = wire::measurement_topic(&self.settings.namespace, &measurement.airport_code);
        let payload = wire::encode(&measurement);

        self.transport
            .publish(
                &topic,
                self.descriptor.qos,
                self.descriptor.retain,
                payload.clone().into_bytes(),
            )
            .await
            .with_context(|| format!("failed to publish to {topic}"))?;

        debug!("published {payload:?} to {topic}");
        Ok(CycleOutcome::Published)
    }
}

/// Handle to a spawned [`SensorRuntime`]
///
/// Runtimes cannot be stopped individually; they stop when the token they
/// were spawned with is cancelled.
pub struct SensorHandle {
    /// Transport identity of the sensor
    pub client_id: String,

    state_rx: watch::Receiver<SensorState>,
    transport: Arc<dyn Transport>,
    task: JoinHandle<()>,
}

impl SensorHandle {
    /// Spawn a runtime for `descriptor` publishing through `transport`
    pub fn spawn(
        descriptor: SensorDescriptor,
        transport: Arc<dyn Transport>,
        acquirer: Arc<dyn MeasurementAcquirer>,
        settings: RuntimeSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SensorState::Idle);
        let client_id = descriptor.client_id.clone();

        let runtime = SensorRuntime::new(
            descriptor,
            transport.clone(),
            acquirer,
            settings,
            cancel,
            state_tx,
        );

        Self {
            client_id,
            state_rx,
            transport,
            task: tokio::spawn(runtime.run()),
        }
    }

    pub fn state(&self) -> SensorState {
        *self.state_rx.borrow()
    }

    /// Receiver observing every state transition
    pub fn watch_state(&self) -> watch::Receiver<SensorState> {
        self.state_rx.clone()
    }

    /// Wait for the runtime to stop after cancellation, aborting it if it
    /// takes longer than `grace`, then close its connection.
    ///
    /// Returns `false` if the runtime had to be aborted.
    pub async fn finish(mut self, grace: Duration) -> bool {
        let stopped = match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("{} runtime failed: {e}", self.client_id);
                true
            }
            Err(_) => {
                warn!("{} did not stop within {grace:?}, aborting", self.client_id);
                self.task.abort();
                false
            }
        };

        self.transport.disconnect().await;
        stopped
    }
}
