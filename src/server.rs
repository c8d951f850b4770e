use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::models::ModelResolver;
use crate::proxy::{self, ProxyOutcome};
use crate::translate::openai_types::ErrorEnvelope;
use crate::translate::request::InboundRequest;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Read-only state shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub resolver: ModelResolver,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ProxyConfig, client: reqwest::Client) -> Self {
        Self {
            resolver: ModelResolver::from_config(&config),
            config,
            client,
            started_at: Utc::now(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/v1/chat/completions", chat_route())
        .route("/chat/completions", chat_route())
        .route("/chat-completions", chat_route())
        .route("/v1/models", models_route())
        .route("/models", models_route())
        .route("/health", get(handle_health).fallback(handle_not_found))
        .fallback(handle_not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn chat_route() -> MethodRouter<Arc<AppState>> {
    post(handle_chat_completions).fallback(handle_not_found)
}

fn models_route() -> MethodRouter<Arc<AppState>> {
    get(handle_models).fallback(handle_not_found)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return ProxyError::invalid_request(format!("Invalid request body: {e}"))
                .into_response();
        }
    };

    let req = match InboundRequest::from_value(&value) {
        Ok(r) => r,
        Err(e) => {
            info!(error = %e, "Rejected chat completion request");
            return e.into_response();
        }
    };

    info!(
        model = %req.model,
        stream = req.stream,
        messages = req.messages.len(),
        "Chat completion request"
    );

    match proxy::forward_completion(&req, &state.config, &state.resolver, &state.client).await {
        Ok(ProxyOutcome::Complete(resp)) => Json(resp).into_response(),
        Ok(ProxyOutcome::Stream(stream)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header("x-accel-buffering", "no")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Ok(ProxyOutcome::UpstreamFailure { status, body }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(body)).into_response()
        }
        Err(e) => {
            error!(error = %e, kind = e.error_type(), "Proxy error");
            e.into_response()
        }
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let features = &state.config.features;
    Json(serde_json::json!({
        "status": "ok",
        "service": "nim-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "upstream": state.config.upstream.base_url,
        "api_key_configured": state.config.resolve_api_key().is_ok(),
        "reasoning_display": features.show_reasoning,
        "thinking_mode": features.thinking_mode,
        "force_non_streaming": features.force_non_streaming,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let created = state.started_at.timestamp();
    let models: Vec<serde_json::Value> = state
        .resolver
        .known_models()
        .into_iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "nim-proxy",
            })
        })
        .collect();

    Json(serde_json::json!({ "object": "list", "data": models }))
}

async fn handle_not_found(method: Method, uri: Uri) -> Response {
    let err = ErrorEnvelope::invalid_request(
        format!("Endpoint {} {} not found", method, uri.path()),
        StatusCode::NOT_FOUND.as_u16(),
    );
    (StatusCode::NOT_FOUND, Json(err)).into_response()
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "Internal server error".to_string()
    };
    error!(message = %message, "Request handler panicked");

    ProxyError::other(message).into_response()
}
