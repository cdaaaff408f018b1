//! Failure handling: upstream errors, broken connections, bad messages

use std::sync::Arc;
use std::time::Duration;

use airport_telemetry::{
    acquirer::{MeasurementAcquirer, MeteoFranceAcquirer},
    actors::{sensor::RuntimeSettings, supervisor::SensorSupervisor},
    error::{AcquisitionError, TransportError},
    transport::{Connector, Message, MessageHandler, Transport, memory::MemoryBroker},
};
use assert_matches::assert_matches;
use async_trait::async_trait;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

/// Connector refusing every identity listed in `refused`
struct RefusingConnector {
    broker: MemoryBroker,
    refused: Vec<&'static str>,
}

#[async_trait]
impl Connector for RefusingConnector {
    async fn connect(&self, identity: &str) -> Result<Arc<dyn Transport>, TransportError> {
        if self.refused.contains(&identity) {
            return Err(TransportError::Connection {
                address: "tcp://localhost:1883".to_string(),
                identity: identity.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.broker.connect(identity).await
    }
}

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        namespace: "airport".to_string(),
        acquisition_timeout: Duration::from_secs(3),
    }
}

#[tokio::test(start_paused = true)]
async fn test_scenario_upstream_failure_skips_one_tick() {
    let broker = MemoryBroker::new();
    let acquirer = Arc::new(ScriptedAcquirer::new(
        vec![
            Ok(5.0),
            Err(AcquisitionError::Unreachable("HTTP error: 503".into())),
        ],
        7.0,
    ));
    let supervisor = SensorSupervisor::new(Arc::new(broker.clone()), acquirer.clone(), settings());

    let handle = supervisor
        .start(vec![create_test_descriptor("wind_sensor_nte", "NTE", 10)])
        .await;

    // ticks at 10s, 20s (fails) and 30s
    tokio::time::sleep(Duration::from_secs(35)).await;

    let payloads = broker
        .published_to("airport/NTE")
        .iter()
        .map(|m| m.payload_str().to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        payloads,
        vec![
            "2024-01-16 12:00:00 wind 5.000000",
            "2024-01-16 12:00:00 wind 7.000000"
        ]
    );
    assert_eq!(acquirer.calls(), 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_broker_skips_sensor() {
    let broker = MemoryBroker::new();
    let supervisor = SensorSupervisor::new(
        Arc::new(RefusingConnector {
            broker: broker.clone(),
            refused: vec!["temperature_sensor_mrs"],
        }),
        Arc::new(ScriptedAcquirer::new(vec![], 21.0)),
        settings(),
    );

    let handle = supervisor
        .start(vec![
            create_test_descriptor("temperature_sensor_mrs", "MRS", 10),
            create_test_descriptor("temperature_sensor_nte", "NTE", 10),
        ])
        .await;

    assert_eq!(handle.running(), vec!["temperature_sensor_nte"]);
    assert_eq!(handle.skipped(), ["temperature_sensor_mrs".to_string()]);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(broker.published_to("airport/NTE").len(), 2);
    assert!(broker.published_to("airport/MRS").is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_provider_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/station/infrahoraire-6m"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let acquirer = MeteoFranceAcquirer::new(server.uri(), None, Duration::from_secs(2)).unwrap();
    let result = acquirer
        .fetch(&create_test_descriptor("temperature_sensor_nte", "NTE", 15))
        .await;

    assert_matches!(result, Err(AcquisitionError::Unreachable(_)));
}

#[tokio::test]
async fn test_provider_invalid_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/station/infrahoraire-6m"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let acquirer = MeteoFranceAcquirer::new(server.uri(), None, Duration::from_secs(2)).unwrap();
    let result = acquirer
        .fetch(&create_test_descriptor("wind_sensor_nte", "NTE", 15))
        .await;

    assert_matches!(result, Err(AcquisitionError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_provider_failure_publishes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/station/infrahoraire-6m"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let broker = MemoryBroker::new();
    let acquirer = MeteoFranceAcquirer::new(server.uri(), None, Duration::from_secs(2)).unwrap();
    let supervisor = SensorSupervisor::new(Arc::new(broker.clone()), Arc::new(acquirer), settings());

    let handle = supervisor
        .start(vec![create_test_descriptor("pressure_sensor_nte", "NTE", 1)])
        .await;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    handle.shutdown().await;

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.len() >= 2);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_garbage_messages_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    let payloads: [&[u8]; 5] = [
        b"",
        b"\xff\xfe\xfd",
        b"not a measurement",
        b"2024-13-45 99:00:00 temperature 45.0",
        b"2024-01-16 12:00:00 temperature hot",
    ];

    for payload in payloads {
        evaluator
            .handle(Message {
                topic: "airport/NTE".to_string(),
                payload: payload.to_vec(),
            })
            .await;
    }

    // the evaluator keeps working afterwards
    evaluator
        .handle(Message {
            topic: "airport/NTE".to_string(),
            payload: b"2024-01-16 12:00:00 temperature 45.0".to_vec(),
        })
        .await;

    let stats = evaluator.stats();
    assert_eq!(stats.received, 6);
    assert_eq!(stats.dropped, 5);
    assert_eq!(stats.alerts, 1);
    assert_eq!(broker.published_to("alert/#").len(), 1);
}

#[tokio::test]
async fn test_invalid_threshold_file_fails_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    std::fs::write(dir.path().join("threshold_config.toml"), "[temperature]\nmin = ").unwrap();

    evaluator
        .handle(Message {
            topic: "airport/NTE".to_string(),
            payload: b"2024-01-16 12:00:00 temperature 45.0".to_vec(),
        })
        .await;

    assert_eq!(evaluator.stats().failed, 1);
    assert!(broker.published().is_empty());
}
