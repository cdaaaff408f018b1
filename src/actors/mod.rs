//! Actors of the telemetry pipeline
//!
//! Each actor runs as an independent async task. Producers and the consumer
//! live in separate processes and only meet on the broker.
//!
//! ## Architecture Overview
//!
//! ```text
//!   airport-sensors process                    alert-manager process
//!  ┌───────────────────────────┐
//!  │      SensorSupervisor     │
//!  │  (one CancellationToken)  │
//!  └─────┬───────────────┬─────┘
//!        │ spawns        │ spawns
//!  ┌─────▼──────┐  ┌─────▼──────┐
//!  │ Sensor-1   │  │ Sensor-N   │          ┌──────────────────┐
//!  │ (own conn) │  │ (own conn) │          │  AlertEvaluator  │
//!  └─────┬──────┘  └─────┬──────┘          └───▲──────────┬───┘
//!        │ publish       │ publish             │ handler  │ publish
//!        ▼               ▼                     │          ▼
//!  ══════════════════ broker: <namespace>/<airport> ══ <alertPrefix><airport>
//! ```
//!
//! ## Actor Types
//!
//! - **SensorRuntime**: acquires and publishes one measurement per interval
//! - **SensorSupervisor**: connects and spawns the runtimes, coordinates shutdown
//! - **AlertEvaluator**: checks each inbound measurement against the thresholds

pub mod alert;
pub mod messages;
pub mod sensor;
pub mod supervisor;
