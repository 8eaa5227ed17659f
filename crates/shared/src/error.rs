use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A record that breaks one of the wire contract invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("unknown instrument '{0}' (expected sks or sn)")]
    UnknownInstrument(String),
    #[error("unknown playback state '{0}'")]
    UnknownState(String),
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("bpm must be a finite number >= 0, got {0}")]
    InvalidBpm(f64),
    #[error("file '{filename}' reports a non-positive bpm {bpm}")]
    NonPositiveFileBpm { filename: String, bpm: f64 },
    #[error("timeline entry {index} has an empty note")]
    EmptyNote { index: usize },
    #[error("timeline entry {index} ({note}) has invalid duration {duration}")]
    InvalidDuration {
        index: usize,
        note: String,
        duration: f64,
    },
    #[error("listing total {total} does not match {actual} returned files")]
    TotalMismatch { total: usize, actual: usize },
}

/// Error body the performance service sends with non-success statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerErrorBody {
    pub error: String,
}

impl ServerErrorBody {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}
