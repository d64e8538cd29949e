//! Error Handling Module
//!
//! Core error type for the bridge. Media and audio failures are deliberately
//! non-fatal at the call sites that produce them: the transcoder degrades the
//! richest media rather than aborting a textual response.

use thiserror::Error;

/// Errors that can occur while bridging a chat request
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Upstream or collaborator HTTP transport failure
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// API returned a non-success status
    #[error("API error {code}: {message}")]
    ApiError { code: u16, message: String },

    /// Failed to parse a payload (JSON, SSE data, chunk shape)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Stream-level failure while reading upstream bytes
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Audio token decode failure
    #[error("Audio decode error: {0}")]
    AudioDecodeError(String),

    /// Audio container encode/decode failure
    #[error("Audio codec error: {0}")]
    CodecError(String),

    /// Media reference could not be resolved
    #[error("Media error: {0}")]
    MediaError(String),

    /// Client sent a request the bridge rejects before calling upstream
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl BridgeError {
    /// Create an API error with a status code and message
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
        }
    }

    /// Status code to surface to the client for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ApiError { code, .. } => *code,
            Self::InvalidRequest(_) => 400,
            Self::HttpError(_) | Self::StreamError(_) => 502,
            _ => 500,
        }
    }

    /// OpenAI-style error body for non-streaming error responses
    pub fn to_error_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": match self {
                    Self::InvalidRequest(_) => "invalid_request_error",
                    _ => "upstream_error",
                },
                "code": self.status_code(),
            }
        })
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpError(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
