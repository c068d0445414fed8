use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use common_auth::TokenVerifier;
use common_http_errors::ApiError;
use common_observability::TerminalMetrics;

use crate::checkout_handlers::{
    await_terminal_checkout, cancel_terminal_checkout, create_cash_payment,
    create_terminal_checkout, get_terminal_checkout, list_terminal_checkouts,
    reconcile_checkouts,
};
use crate::orchestrator::CheckoutOrchestrator;
use crate::poller::StatusPoller;
use crate::tenant::TenantResolver;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CheckoutOrchestrator>,
    pub poller: Arc<StatusPoller>,
    pub resolver: Arc<TenantResolver>,
    pub token_verifier: Arc<TokenVerifier>,
    pub metrics: TerminalMetrics,
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.token_verifier.clone()
    }
}

pub async fn http_error_metrics(
    State(metrics): State<TerminalMetrics>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("X-Error-Code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        metrics.record_http_error("terminal-service", code, status.as_u16());
    }
    resp
}

pub async fn health() -> &'static str {
    "ok"
}

// Real preflights are answered by the CORS layer before routing; this covers
// bare OPTIONS probes, which must succeed without credentials.
pub async fn preflight_ok() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

pub fn build_router(state: AppState) -> Router {
    let allowed_origins = [
        "http://localhost:3000",
        "http://localhost:3001",
        "http://localhost:5173",
    ];
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("authorization"),
        ]);

    async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
        state.metrics.render().map_err(ApiError::internal)
    }

    let error_metrics = state.metrics.clone();

    Router::new()
        .route("/healthz", get(health))
        .route(
            "/terminal-checkouts",
            post(create_terminal_checkout)
                .get(list_terminal_checkouts)
                .options(preflight_ok),
        )
        .route(
            "/terminal-checkouts/:checkout_id",
            get(get_terminal_checkout).options(preflight_ok),
        )
        .route(
            "/terminal-checkouts/:checkout_id/cancel",
            post(cancel_terminal_checkout).options(preflight_ok),
        )
        .route(
            "/terminal-checkouts/:checkout_id/wait",
            post(await_terminal_checkout).options(preflight_ok),
        )
        .route("/cash-payments", post(create_cash_payment).options(preflight_ok))
        .route("/reconcile", post(reconcile_checkouts).options(preflight_ok))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            error_metrics,
            http_error_metrics,
        ))
}
