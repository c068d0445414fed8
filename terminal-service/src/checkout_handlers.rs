use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common_auth::AuthContext;
use common_http_errors::{ApiError, ApiResult};

use crate::app::AppState;
use crate::orchestrator::{CardCheckoutRequest, CashPaymentRequest};
use crate::square::CheckoutStatus;
use crate::store::CheckoutRecord;

/// Checkout fields exposed to POS clients. The stored processor payload
/// and the tenant id stay server-side.
#[derive(Debug, Serialize)]
pub struct CheckoutView {
    pub checkout_id: String,
    pub order_id: String,
    pub device_id: String,
    pub checkout_status: String,
    pub payment_ids: Vec<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CheckoutRecord> for CheckoutView {
    fn from(record: CheckoutRecord) -> Self {
        Self {
            checkout_id: record.remote_checkout_id,
            order_id: record.remote_order_id,
            device_id: record.device_id,
            checkout_status: record.status,
            payment_ids: record.payment_ids,
            reference_id: record.reference_id,
            note: record.note,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateCheckoutResponse {
    pub ok: bool,
    pub order_id: String,
    pub checkout_id: String,
    pub checkout_status: String,
    pub payment_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CashPaymentResponse {
    pub ok: bool,
    pub order_id: String,
    pub payment_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub checkout: CheckoutView,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub ok: bool,
    pub canceled: bool,
    #[serde(flatten)]
    pub checkout: CheckoutView,
}

#[derive(Debug, Serialize)]
pub struct WaitResponse {
    pub ok: bool,
    pub result: &'static str,
    #[serde(flatten)]
    pub checkout: CheckoutView,
}

#[derive(Debug, Serialize)]
pub struct CheckoutListResponse {
    pub ok: bool,
    pub checkouts: Vec<CheckoutView>,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub ok: bool,
    pub refreshed: usize,
    pub completed: usize,
    pub canceled: usize,
    pub still_pending: usize,
    pub orphaned_order_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unfinished: Option<bool>,
}

pub async fn create_terminal_checkout(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CardCheckoutRequest>,
) -> ApiResult<Json<CreateCheckoutResponse>> {
    let tenant_id = state.resolver.resolve_scope(&auth.claims).await?;
    let record = state
        .orchestrator
        .begin_card_checkout(tenant_id, request)
        .await?;
    Ok(Json(CreateCheckoutResponse {
        ok: true,
        order_id: record.remote_order_id,
        checkout_id: record.remote_checkout_id,
        checkout_status: record.status,
        payment_ids: record.payment_ids,
    }))
}

pub async fn create_cash_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CashPaymentRequest>,
) -> ApiResult<Json<CashPaymentResponse>> {
    let tenant_id = state.resolver.resolve_scope(&auth.claims).await?;
    let record = state
        .orchestrator
        .begin_cash_checkout(tenant_id, request)
        .await?;
    Ok(Json(CashPaymentResponse {
        ok: true,
        order_id: record.remote_order_id,
        payment_id: record.remote_payment_id,
        status: record.status,
    }))
}

pub async fn get_terminal_checkout(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(checkout_id): Path<String>,
) -> ApiResult<Json<CheckoutResponse>> {
    let tenant_id = state.resolver.resolve_scope(&auth.claims).await?;
    let record = state
        .orchestrator
        .checkout_status(tenant_id, &checkout_id)
        .await?;
    Ok(Json(CheckoutResponse {
        ok: true,
        checkout: record.into(),
    }))
}

pub async fn cancel_terminal_checkout(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(checkout_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let tenant_id = state.resolver.resolve_scope(&auth.claims).await?;
    let record = state
        .orchestrator
        .cancel_checkout(tenant_id, &checkout_id)
        .await?;
    let canceled = CheckoutStatus::from_wire(&record.status) == CheckoutStatus::Canceled;
    Ok(Json(CancelResponse {
        ok: true,
        canceled,
        checkout: record.into(),
    }))
}

pub async fn await_terminal_checkout(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(checkout_id): Path<String>,
) -> ApiResult<Json<WaitResponse>> {
    let tenant_id = state.resolver.resolve_scope(&auth.claims).await?;
    let outcome = state
        .poller
        .run(&state.orchestrator, tenant_id, &checkout_id)
        .await?;
    Ok(Json(WaitResponse {
        ok: true,
        result: outcome.as_str(),
        checkout: outcome.into_record().into(),
    }))
}

pub async fn list_terminal_checkouts(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<CheckoutListResponse>> {
    let tenant_id = state.resolver.resolve_scope(&auth.claims).await?;
    if query.unfinished == Some(false) {
        return Err(ApiError::bad_request(
            "unsupported_filter",
            "only unfinished=true listings are supported",
        ));
    }
    let records = state.orchestrator.list_unfinished(tenant_id).await?;
    Ok(Json(CheckoutListResponse {
        ok: true,
        checkouts: records.into_iter().map(CheckoutView::from).collect(),
    }))
}

pub async fn reconcile_checkouts(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<ReconcileResponse>> {
    let tenant_id = state.resolver.resolve_scope(&auth.claims).await?;
    let report = state.orchestrator.reconcile(tenant_id).await?;
    Ok(Json(ReconcileResponse {
        ok: true,
        refreshed: report.refreshed,
        completed: report.completed,
        canceled: report.canceled,
        still_pending: report.still_pending,
        orphaned_order_ids: report.orphaned_order_ids,
    }))
}
