//! AlertEvaluator - Checks inbound measurements against the thresholds
//!
//! ## Evaluation Steps
//!
//! ```text
//! payload ─decode─► reading ─kind─► load thresholds ─► check ─violation─► publish alert
//!    │                               │
//!    └─ DecodeError: drop            └─ unknown kind: report
//! ```
//!
//! The airport code is always taken from the inbound topic, never from the
//! payload. Thresholds are loaded through the [`ThresholdStore`] for every
//! message, so a store configured to reload picks up edits immediately.
//!
//! Every violating message produces exactly one alert; there is no
//! suppression, deduplication or rate limiting.
//!
//! The evaluator holds no mutable state besides atomic counters, so the
//! transport may invoke it concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::SensorKind;
use crate::error::EvaluationError;
use crate::thresholds::ThresholdStore;
use crate::transport::{Message, MessageHandler, QoS, Transport};
use crate::wire;

use super::messages::{AlertMessage, EvaluatorSnapshot, EvaluatorStats};

pub struct AlertEvaluator {
    thresholds: ThresholdStore,
    transport: Arc<dyn Transport>,
    alert_prefix: String,
    stats: EvaluatorStats,
}

impl AlertEvaluator {
    pub fn new(
        thresholds: ThresholdStore,
        transport: Arc<dyn Transport>,
        alert_prefix: impl Into<String>,
    ) -> Self {
        Self {
            thresholds,
            transport,
            alert_prefix: alert_prefix.into(),
            stats: EvaluatorStats::default(),
        }
    }

    pub fn stats(&self) -> EvaluatorSnapshot {
        self.stats.snapshot()
    }

    /// Evaluate one measurement message, publishing an alert if it violates
    /// its threshold.
    #[instrument(skip(self, payload))]
    pub async fn evaluate(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Option<AlertMessage>, EvaluationError> {
        let reading = wire::decode(payload)?;

        let kind = reading.kind.parse::<SensorKind>()?;
        let thresholds = self.thresholds.load().await?;

        let Some(violation) = thresholds.check(kind, &reading.observed_at, reading.value) else {
            debug!("{kind} {} within limits", reading.value);
            return Ok(None);
        };

        let airport = wire::airport_code(topic)?;

        let alert = AlertMessage {
            topic: wire::alert_topic(&self.alert_prefix, airport),
            text: violation.describe(),
        };

        self.transport
            .publish(
                &alert.topic,
                QoS::AtLeastOnce,
                false,
                alert.text.clone().into_bytes(),
            )
            .await?;

        info!("{} → {}", alert.text, alert.topic);
        Ok(Some(alert))
    }
}

#[async_trait]
impl MessageHandler for AlertEvaluator {
    async fn handle(&self, message: Message) {
        self.stats.record_received();

        match self.evaluate(&message.topic, &message.payload).await {
            Ok(Some(_)) => self.stats.record_alert(),
            Ok(None) => {}
            Err(e @ (EvaluationError::Decode(_) | EvaluationError::Topic(_))) => {
                warn!("dropping message on {}: {e}", message.topic);
                self.stats.record_dropped();
            }
            Err(EvaluationError::UnknownKind(e)) => {
                error!(
                    "message on {} names a sensor kind outside the dispatch table: {e}",
                    message.topic
                );
                self.stats.record_failed();
            }
            Err(e) => {
                error!("failed to evaluate message on {}: {e}", message.topic);
                self.stats.record_failed();
            }
        }
    }
}
