//! HTTP transport: routes, request decoding, and the internal API-key guard.

pub mod health;
pub mod payments;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::config::Config;
use crate::payments::service::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<PaymentService>,
}

pub fn router(state: AppState) -> Router {
    let internal = Router::new()
        .route(
            "/payments",
            post(payments::create_payment).get(payments::list_payments),
        )
        .route("/payments/{id}", get(payments::get_payment))
        .route("/payments/{id}/cancel", post(payments::cancel_payment))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(internal)
        .route(
            "/callbacks/{provider}/{hash}",
            post(payments::handle_provider_callback),
        )
        .route("/health", get(health::health_check))
        .with_state(state)
}

/// Caller-service authorization: when an app API key is configured, internal
/// routes require a matching X-API-Key header. Provider callbacks and health
/// are exempt (providers authenticate via webhook signatures).
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.app.api_key.trim();
    if expected.is_empty() {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if provided != expected {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid api key" })),
        )
            .into_response();
    }

    next.run(request).await
}
