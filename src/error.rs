//! Error types shared across the telemetry pipeline
//!
//! Each error class maps to one recovery policy:
//!
//! - [`TransportError`]: connection failures skip the affected sensor, publish
//!   failures abandon the current cycle or alert
//! - [`AcquisitionError`]: the current cycle is skipped, the next tick retries
//! - [`DecodeError`] / [`TopicError`]: the inbound message is dropped
//! - [`ConfigError`]: fatal for the owning process at startup
//! - [`UnknownKindError`]: reported loudly, the consumer keeps running

use std::num::ParseFloatError;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by a pub/sub transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to broker {address} as {identity}: {reason}")]
    Connection {
        address: String,
        identity: String,
        reason: String,
    },

    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("failed to subscribe to {filter}: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("no acknowledgement for publish to {topic} within {timeout:?}")]
    AckTimeout { topic: String, timeout: Duration },

    #[error("transport is closed")]
    Closed,
}

/// Errors raised while fetching a measurement from the upstream provider
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("upstream returned no observation")]
    EmptyResponse,

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
}

/// Errors raised while decoding a wire payload
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("expected 4 space-delimited fields, found {0}")]
    FieldCount(usize),

    #[error("invalid timestamp {raw:?}: {source}")]
    Timestamp {
        raw: String,
        source: chrono::ParseError,
    },

    #[error("invalid value {raw:?}: {source}")]
    Value { raw: String, source: ParseFloatError },
}

/// A topic that does not carry an airport code in its second segment
#[derive(Debug, Error)]
#[error("topic {0:?} has no airport code segment")]
pub struct TopicError(pub String);

/// A sensor kind outside the dispatch table
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown sensor kind: {0}")]
pub struct UnknownKindError(pub String);

/// Errors raised while loading sensor, application or threshold configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything that can go wrong while evaluating one inbound measurement
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    UnknownKind(#[from] UnknownKindError),

    #[error(transparent)]
    Publish(#[from] TransportError),
}
