//! Errors for fallible setup paths
//!
//! Runtime anomalies inside a running match are logged and recovered in
//! place; only loading levels/settings and decoding payloads return errors.

use thiserror::Error;

/// Errors produced while building a match or decoding wire payloads.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse level descriptor: {0}")]
    LevelParse(#[source] serde_json::Error),

    #[error("no built-in level for {0} players")]
    UnknownLevel(usize),

    #[error("invalid level descriptor: {0}")]
    InvalidLevel(String),

    #[error("invalid segment name `{0}`")]
    SegmentName(String),

    #[error("failed to parse settings: {0}")]
    SettingsParse(#[source] serde_json::Error),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("malformed `{event}` payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid entity name `{0}`")]
    EntityName(String),

    #[error("usage: {0}")]
    Usage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
