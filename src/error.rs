//! Error types for the proxy.
//!
//! Every [`ProxyError`] maps to an HTTP status and a stable `type` string, and
//! renders as the standard `{ "error": { message, type, code } }` envelope.
//! Upstream HTTP failures are not errors here: they are forwarded as-is by
//! [`crate::proxy`].

use crate::translate::openai_types::ErrorEnvelope;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("Server misconfigured: {message}")]
    Misconfigured { message: String },

    #[error("Upstream request timed out after {secs}s")]
    UpstreamTimeout { secs: u64 },

    #[error("Upstream transport error: {message}")]
    Transport { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn misconfigured(msg: impl Into<String>) -> Self {
        Self::Misconfigured {
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify a failure to reach the upstream at all.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout { secs: timeout_secs }
        } else {
            Self::transport(err.to_string())
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request_error",
            Self::Misconfigured { .. } => "server_misconfigured",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::Transport { .. } => "transport_error",
            _ => "server_error",
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.to_string(), self.error_type(), self.status().as_u16())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_envelope())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_type_mapping() {
        let err = ProxyError::invalid_request("model is required");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "invalid_request_error");

        let err = ProxyError::misconfigured("NIM_API_KEY not set");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_type(), "server_misconfigured");

        let err = ProxyError::UpstreamTimeout { secs: 30 };
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_type(), "upstream_timeout");

        assert_eq!(ProxyError::transport("dns").error_type(), "transport_error");
        assert_eq!(ProxyError::other("boom").error_type(), "server_error");
    }

    #[test]
    fn test_envelope_carries_message_and_code() {
        let envelope = ProxyError::invalid_request("messages must be an array").to_envelope();
        assert_eq!(envelope.error.message, "messages must be an array");
        assert_eq!(envelope.error.error_type, "invalid_request_error");
        assert_eq!(envelope.error.code, 400);
    }
}
