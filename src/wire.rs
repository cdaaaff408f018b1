//! Wire payload and topic conventions
//!
//! A measurement travels as one space-delimited line:
//!
//! ```text
//! <YYYY-MM-DD> <HH:MM:SS> <sensorKind> <value>
//! ```
//!
//! Measurement topics are `<namespace>/<airportCode>`; alert topics are the
//! alert prefix concatenated with the airport code.

use chrono::NaiveDateTime;

use crate::Measurement;
use crate::error::{DecodeError, TopicError};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A decoded payload whose kind has not been checked against the dispatch
/// table yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub observed_at: NaiveDateTime,
    pub kind: String,
    pub value: f64,
}

pub fn encode(measurement: &Measurement) -> String {
    format!(
        "{} {} {:.6}",
        measurement.observed_at.format(TIMESTAMP_FORMAT),
        measurement.kind,
        measurement.value
    )
}

pub fn decode(payload: &[u8]) -> Result<RawReading, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    decode_str(text)
}

pub fn decode_str(text: &str) -> Result<RawReading, DecodeError> {
    // older producers wrapped the whole line in double quotes
    let text = text.trim();
    let text = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);

    let fields = text.split_whitespace().collect::<Vec<_>>();
    let &[date, time, kind, value] = fields.as_slice() else {
        return Err(DecodeError::FieldCount(fields.len()));
    };

    let raw_timestamp = format!("{date} {time}");
    let observed_at = NaiveDateTime::parse_from_str(&raw_timestamp, TIMESTAMP_FORMAT).map_err(
        |source| DecodeError::Timestamp {
            raw: raw_timestamp.clone(),
            source,
        },
    )?;

    let value = value.parse::<f64>().map_err(|source| DecodeError::Value {
        raw: value.to_string(),
        source,
    })?;

    Ok(RawReading {
        observed_at,
        kind: kind.to_string(),
        value,
    })
}

pub fn measurement_topic(namespace: &str, airport_code: &str) -> String {
    format!("{namespace}/{airport_code}")
}

pub fn alert_topic(alert_prefix: &str, airport_code: &str) -> String {
    format!("{alert_prefix}{airport_code}")
}

/// Extract the airport code, i.e. the second `/`-separated segment.
pub fn airport_code(topic: &str) -> Result<&str, TopicError> {
    match topic.split('/').nth(1) {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(TopicError(topic.to_string())),
    }
}

/// MQTT-style topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
