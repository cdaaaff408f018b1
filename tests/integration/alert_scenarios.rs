//! Alert evaluation scenarios

use airport_telemetry::{
    error::EvaluationError,
    transport::{Message, MessageHandler, memory::MemoryBroker},
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_scenario_temperature_above_band_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    let alert = evaluator
        .evaluate("airport/NTE", b"2024-01-16 12:00:00 temperature 45.0")
        .await
        .unwrap()
        .expect("temperature above band must alert");

    assert!(alert.text.contains("45.000000"));
    assert!(alert.text.contains("-10.000000-40.000000"));
    assert_eq!(alert.topic, "alert/NTE");
}

#[tokio::test]
async fn test_scenario_wind_below_limit_no_alert() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    let alert = evaluator
        .evaluate("airport/NTE", b"2024-06-01 08:00:00 wind 12.0")
        .await
        .unwrap();

    assert_eq!(alert, None);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_scenario_pressure_uses_winter_band_in_december() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    let alert = evaluator
        .evaluate("airport/CDG", b"2024-12-01 00:00:00 pressure 1035.0")
        .await
        .unwrap()
        .expect("pressure above winter band must alert");

    assert_eq!(
        alert.text,
        "Alert: Pressure (1035.000000) exceeded threshold (980.000000-1030.000000)"
    );
    assert_eq!(alert.topic, "alert/CDG");
}

#[tokio::test]
async fn test_pressure_season_follows_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    // 985 hPa: below the summer band, inside the winter band
    let summer = evaluator
        .evaluate("airport/NTE", b"2024-09-30 23:59:59 pressure 985.0")
        .await
        .unwrap();
    let winter = evaluator
        .evaluate("airport/NTE", b"2024-10-01 00:00:00 pressure 985.0")
        .await
        .unwrap();

    assert!(summer.is_some());
    assert_eq!(winter, None);
}

#[tokio::test]
async fn test_scenario_malformed_payload_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    assert_matches!(
        evaluator
            .evaluate("airport/NTE", b"2024-01-16 12:00:00 temperature")
            .await,
        Err(EvaluationError::Decode(_))
    );

    evaluator
        .handle(Message {
            topic: "airport/NTE".to_string(),
            payload: b"2024-01-16 12:00:00 temperature".to_vec(),
        })
        .await;

    let stats = evaluator.stats();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.alerts, 0);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_bounds_never_alert() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    let payloads: [&[u8]; 5] = [
        b"2024-01-16 12:00:00 temperature -10.0",
        b"2024-01-16 12:00:00 temperature 40.0",
        b"2024-01-16 12:00:00 wind 15.0",
        b"2024-07-01 12:00:00 pressure 990.0",
        b"2024-01-01 12:00:00 pressure 980.0",
    ];

    for payload in payloads {
        assert_eq!(evaluator.evaluate("airport/NTE", payload).await.unwrap(), None);
    }
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_threshold_edits_apply_to_next_message() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);
    let payload = b"2024-06-01 08:00:00 wind 20.0";

    assert!(evaluator.evaluate("airport/NTE", payload).await.unwrap().is_some());

    std::fs::write(
        dir.path().join("threshold_config.toml"),
        THRESHOLDS.replace("speed = 15.0", "speed = 25.0"),
    )
    .unwrap();

    assert_eq!(evaluator.evaluate("airport/NTE", payload).await.unwrap(), None);
}

#[tokio::test]
async fn test_no_alert_suppression() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let evaluator = create_test_evaluator(&dir, &broker);

    for _ in 0..3 {
        evaluator
            .evaluate("airport/NTE", b"2024-06-01 08:00:00 wind 20.0")
            .await
            .unwrap();
    }

    assert_eq!(broker.published_to("alert/NTE").len(), 3);
}
