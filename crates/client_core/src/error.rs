use shared::error::{ProtocolError, ServerErrorBody};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {code}: {}", summarize_body(.body))]
    HttpStatus { code: u16, body: String },
    #[error("could not decode response from {path}: {reason}")]
    Decode { path: String, reason: String },
}

impl ClientError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The `error` field of a rejected request's JSON body, if it had one.
    pub fn server_message(&self) -> Option<String> {
        match self {
            Self::HttpStatus { body, .. } => ServerErrorBody::parse(body).map(|b| b.error),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

fn summarize_body(body: &str) -> String {
    if let Some(parsed) = ServerErrorBody::parse(body) {
        return parsed.error;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "<empty body>".to_string()
    } else {
        trimmed.to_string()
    }
}
