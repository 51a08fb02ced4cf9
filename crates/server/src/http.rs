//! HTTP control plane
//!
//! Health, metrics, and the speech-token endpoint for the browser
//! recognizer. The WebSocket upgrade lives here too.

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws::ws_handler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/metrics", get(api_metrics))
        .route("/api/speech/token", get(speech_token))
        .route("/metrics", get(prometheus_metrics))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
///
/// - Disabled: permissive (development only)
/// - No origins configured: localhost:3000 for safety
/// - Otherwise: exactly the configured origins
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("No CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed.len());
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "method": "GET",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn api_metrics(State(state): State<AppState>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(state.hub.metrics_snapshot())
}

/// Short-lived STT credential for the browser recognizer. Opaque to the
/// relay: it is either pre-provisioned in config or a one-off token.
async fn speech_token(State(state): State<AppState>) -> Json<serde_json::Value> {
    let token = state
        .settings
        .server
        .speech_token
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Json(serde_json::json!({
        "token": token,
        "region": state.settings.server.speech_region,
        "expires_in": 600,
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}
