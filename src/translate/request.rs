//! Validate inbound chat requests and build the upstream request envelope.
//!
//! Callers are loose about numeric types (strings, floats for integer fields),
//! so optional numerics are coerced and fall back to defaults instead of
//! being rejected. Only a missing/empty `model` or a non-array `messages` is a
//! client error.

use serde_json::Value;

use super::openai_types::{ChatMessage, ChatTemplateKwargs, UpstreamRequest};
use crate::config::FeatureFlags;
use crate::error::{ProxyError, Result};

pub const DEFAULT_TEMPERATURE: f64 = 0.6;
pub const DEFAULT_MAX_TOKENS: u64 = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u64,
    pub stream: bool,
}

impl InboundRequest {
    /// Validate a parsed request body and apply defaults.
    pub fn from_value(body: &Value) -> Result<Self> {
        let model = match body.get("model") {
            Some(Value::String(m)) if !m.trim().is_empty() => m.clone(),
            Some(Value::String(_)) => {
                return Err(ProxyError::invalid_request("'model' must not be empty"))
            }
            Some(_) => return Err(ProxyError::invalid_request("'model' must be a string")),
            None => return Err(ProxyError::invalid_request("'model' is required")),
        };

        let messages = match body.get("messages") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    serde_json::from_value::<ChatMessage>(item.clone()).map_err(|e| {
                        ProxyError::invalid_request(format!("Invalid message at index {i}: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(ProxyError::invalid_request("'messages' must be an array")),
            None => return Err(ProxyError::invalid_request("'messages' is required")),
        };

        let temperature = body
            .get("temperature")
            .and_then(coerce_f64)
            .unwrap_or(DEFAULT_TEMPERATURE);

        let max_tokens = body
            .get("max_tokens")
            .and_then(coerce_f64)
            .map(f64::trunc)
            .filter(|n| *n >= 1.0)
            .map_or(DEFAULT_MAX_TOKENS, |n| n as u64);

        let stream = matches!(body.get("stream"), Some(Value::Bool(true)));

        Ok(Self {
            model,
            messages,
            temperature,
            max_tokens,
            stream,
        })
    }
}

/// Numbers pass through, numeric strings are parsed; anything non-finite is
/// treated as absent.
fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Build the upstream request. Pure function: the resolved model and the
/// feature flags are supplied by the caller.
pub fn build_upstream_request(
    req: &InboundRequest,
    resolved_model: &str,
    flags: &FeatureFlags,
) -> UpstreamRequest {
    let chat_template_kwargs = flags
        .thinking_mode
        .then_some(ChatTemplateKwargs { thinking: true });

    UpstreamRequest {
        model: resolved_model.to_string(),
        messages: req.messages.clone(),
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        stream: req.stream && !flags.force_non_streaming,
        chat_template_kwargs,
    }
}
