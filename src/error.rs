use thiserror::Error;

/// Fallback message when a failed response carries no `detail`.
pub const REQUEST_ERROR_MESSAGE: &str = "request error";

/// Message for calls that never produced a response.
pub const NETWORK_ERROR_MESSAGE: &str = "network error";

#[derive(Debug, Error)]
pub enum ClientError {
    /// The service answered with a status outside [200, 300).
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: serde_json::Value,
    },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("container call failed: {0}")]
    Container(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid data URI: {0}")]
    DataUri(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected response: {0}")]
    SchemaParse(String),

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// HTTP status code, for failures that came with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true when the call could not be completed at all.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Request(e) => e.status().is_none(),
            Self::Container(_) => true,
            _ => false,
        }
    }

    /// The single human-readable message surfaced to the user, regardless of
    /// which transport produced the failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { message, .. } => message.clone(),
            Self::Request(e) if e.status().is_some() => REQUEST_ERROR_MESSAGE.to_string(),
            Self::Request(_) | Self::Container(_) => NETWORK_ERROR_MESSAGE.to_string(),
            Self::InvalidRequest(msg) => format!("invalid request: {msg}"),
            Self::Store(_) => "local storage unavailable".to_string(),
            Self::DataUri(_) => "image could not be decoded".to_string(),
            Self::Io(_) => "local file error".to_string(),
            Self::SchemaParse(_) => "failed to parse service response".to_string(),
            Self::Other(msg) => msg.clone(),
        }
    }
}
