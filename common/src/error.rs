use thiserror::Error;

/// A payload that could not be turned into channel values. Escalates to the
/// supervisor as a dispatch failure; a malformed payload on a bound topic is
/// a protocol-level problem, not something to swallow.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid utf-8")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("expected a numeric payload, got {0:?}")]
    NotNumeric(String),
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a json object")]
    NotJsonObject,
    #[error("field {0:?} is missing or not numeric")]
    MissingField(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
}

/// Topic registration happens once at startup, so these are startup-fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("topic {0:?} is already bound")]
    DuplicateTopic(String),
    #[error("binding references unknown channel {0:?}")]
    UnknownChannel(String),
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid broker port {0:?}")]
    InvalidPort(String),
}
