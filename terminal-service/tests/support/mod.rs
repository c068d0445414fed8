#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common_auth::{TokenConfig, TokenVerifier};
use common_observability::TerminalMetrics;
use terminal_service::config::ServiceConfig;
use terminal_service::orchestrator::CheckoutOrchestrator;
use terminal_service::poller::StatusPoller;
use terminal_service::square::{
    CashPaymentDraft, CheckoutDraft, CheckoutStatus, GatewayCheckout, GatewayError, GatewayOrder,
    GatewayPayment, OrderDraft, TerminalGateway,
};
use terminal_service::store::MemoryCheckoutStore;
use terminal_service::tenant::TenantResolver;
use terminal_service::{build_router, AppState};

pub const TEST_SECRET: &[u8] = b"integration-test-secret";
pub const TEST_ISSUER: &str = "pos-auth";
pub const TEST_AUDIENCE: &str = "terminal-service";

/// One scripted answer for a status query against the fake processor.
pub enum ScriptStep {
    Status(&'static str),
    Fail,
}

#[derive(Default)]
struct FakeInner {
    orders_by_key: HashMap<String, GatewayOrder>,
    checkouts_by_key: HashMap<String, GatewayCheckout>,
    payments_by_key: HashMap<String, GatewayPayment>,
    status_script: VecDeque<ScriptStep>,
    current_status: HashMap<String, String>,
    cancel_status: Option<&'static str>,
    fail_checkout_create: bool,
    fail_payment_create: bool,
}

/// In-process stand-in for the payment processor. Creation calls dedupe on
/// the idempotency key exactly like the real API, and status queries can be
/// scripted per call.
pub struct FakeGateway {
    inner: Mutex<FakeInner>,
    pub order_calls: AtomicUsize,
    pub checkout_calls: AtomicUsize,
    pub payment_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FakeInner::default()),
            order_calls: AtomicUsize::new(0),
            checkout_calls: AtomicUsize::new(0),
            payment_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    pub fn script_statuses(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        let mut inner = self.inner.lock().unwrap();
        inner.status_script.extend(steps);
    }

    pub fn cancel_answers(&self, status: &'static str) {
        self.inner.lock().unwrap().cancel_status = Some(status);
    }

    pub fn fail_checkout_creation(&self) {
        self.inner.lock().unwrap().fail_checkout_create = true;
    }

    pub fn allow_checkout_creation(&self) {
        self.inner.lock().unwrap().fail_checkout_create = false;
    }

    pub fn fail_payment_creation(&self) {
        self.inner.lock().unwrap().fail_payment_create = true;
    }

    fn build_checkout(id: &str, status: &str) -> GatewayCheckout {
        let payment_ids = if status == "COMPLETED" {
            vec![format!("{id}_pay")]
        } else {
            Vec::new()
        };
        GatewayCheckout {
            id: id.to_owned(),
            status: CheckoutStatus::from_wire(status),
            payment_ids,
            raw: json!({"id": id, "status": status}),
        }
    }
}

#[async_trait]
impl TerminalGateway for FakeGateway {
    async fn create_order(&self, draft: OrderDraft) -> Result<GatewayOrder, GatewayError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.orders_by_key.get(&draft.idempotency_key) {
            return Ok(existing.clone());
        }
        let id = format!("ord_{}", Uuid::new_v4().simple());
        let order = GatewayOrder {
            id: id.clone(),
            state: "OPEN".to_owned(),
            raw: json!({"id": id, "state": "OPEN", "location_id": draft.location_id}),
        };
        inner.orders_by_key.insert(draft.idempotency_key, order.clone());
        Ok(order)
    }

    async fn create_terminal_checkout(
        &self,
        draft: CheckoutDraft,
    ) -> Result<GatewayCheckout, GatewayError> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_checkout_create {
            return Err(GatewayError::Api {
                status: 404,
                code: "DEVICE_NOT_FOUND".to_owned(),
                detail: "device is not paired".to_owned(),
            });
        }
        if let Some(existing) = inner.checkouts_by_key.get(&draft.idempotency_key) {
            return Ok(existing.clone());
        }
        let id = format!("chk_{}", Uuid::new_v4().simple());
        let checkout = Self::build_checkout(&id, "PENDING");
        inner.current_status.insert(id.clone(), "PENDING".to_owned());
        inner
            .checkouts_by_key
            .insert(draft.idempotency_key, checkout.clone());
        Ok(checkout)
    }

    async fn create_cash_payment(
        &self,
        draft: CashPaymentDraft,
    ) -> Result<GatewayPayment, GatewayError> {
        self.payment_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_payment_create {
            return Err(GatewayError::Api {
                status: 400,
                code: "INVALID_VALUE".to_owned(),
                detail: "cash payments are disabled for this location".to_owned(),
            });
        }
        if let Some(existing) = inner.payments_by_key.get(&draft.idempotency_key) {
            return Ok(existing.clone());
        }
        let id = format!("pay_{}", Uuid::new_v4().simple());
        let payment = GatewayPayment {
            id: id.clone(),
            status: "COMPLETED".to_owned(),
            raw: json!({"id": id, "status": "COMPLETED", "order_id": draft.order_id}),
        };
        inner.payments_by_key.insert(draft.idempotency_key, payment.clone());
        Ok(payment)
    }

    async fn get_terminal_checkout(
        &self,
        checkout_id: &str,
    ) -> Result<GatewayCheckout, GatewayError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        match inner.status_script.pop_front() {
            Some(ScriptStep::Status(status)) => {
                inner
                    .current_status
                    .insert(checkout_id.to_owned(), status.to_owned());
                Ok(Self::build_checkout(checkout_id, status))
            }
            Some(ScriptStep::Fail) => Err(GatewayError::Api {
                status: 500,
                code: "INTERNAL_SERVER_ERROR".to_owned(),
                detail: "processor hiccup".to_owned(),
            }),
            None => {
                let status = inner
                    .current_status
                    .get(checkout_id)
                    .cloned()
                    .unwrap_or_else(|| "IN_PROGRESS".to_owned());
                Ok(Self::build_checkout(checkout_id, &status))
            }
        }
    }

    async fn cancel_terminal_checkout(
        &self,
        checkout_id: &str,
    ) -> Result<GatewayCheckout, GatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let status = inner.cancel_status.unwrap_or("CANCELED");
        inner
            .current_status
            .insert(checkout_id.to_owned(), status.to_owned());
        Ok(Self::build_checkout(checkout_id, status))
    }
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        database_url: None,
        square_access_token: "test-access-token".to_owned(),
        square_api_url: "http://127.0.0.1:1".to_owned(),
        square_version: "2024-01-18".to_owned(),
        square_location_id: "LOC_TEST".to_owned(),
        default_currency: "USD".to_owned(),
        gateway_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(5),
        poll_max_attempts: 3,
        jwt_secret: String::from_utf8_lossy(TEST_SECRET).into_owned(),
        jwt_issuer: TEST_ISSUER.to_owned(),
        jwt_audience: TEST_AUDIENCE.to_owned(),
        jwt_leeway_seconds: None,
        dev_tenant_id: None,
        host: "127.0.0.1".to_owned(),
        port: 0,
    }
}

#[derive(Serialize)]
struct TokenClaims<'a> {
    sub: String,
    iss: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

pub fn mint_token(user_id: Uuid, ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = TokenClaims {
        sub: user_id.to_string(),
        iss: TEST_ISSUER,
        aud: TEST_AUDIENCE,
        exp: now + ttl_secs,
        iat: now,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET),
    )
    .expect("mint token")
}

/// Full service wired against the fake processor and the in-memory store,
/// with one membership granted up front.
pub struct TestHarness {
    pub router: Router,
    pub store: Arc<MemoryCheckoutStore>,
    pub gateway: Arc<FakeGateway>,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub token: String,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::build(true, None).await
    }

    pub async fn without_membership() -> Self {
        Self::build(false, None).await
    }

    pub async fn with_dev_tenant(dev_tenant: Uuid) -> Self {
        Self::build(false, Some(dev_tenant)).await
    }

    async fn build(with_membership: bool, dev_tenant: Option<Uuid>) -> Self {
        let config = test_config();
        let metrics = TerminalMetrics::new().expect("metrics");
        let store = Arc::new(MemoryCheckoutStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        if with_membership {
            store.grant_membership(user_id, tenant_id).await;
        }
        let orchestrator = Arc::new(CheckoutOrchestrator::new(
            gateway.clone(),
            store.clone(),
            metrics.clone(),
            &config,
        ));
        let poller = Arc::new(StatusPoller::new(&config, metrics.clone()));
        let mut resolver = TenantResolver::new(store.clone());
        if let Some(tenant) = dev_tenant {
            resolver = resolver.with_dev_tenant(tenant);
        }
        let token_verifier = Arc::new(TokenVerifier::new(
            TokenConfig::new(TEST_ISSUER, TEST_AUDIENCE),
            TEST_SECRET,
        ));
        let token = mint_token(user_id, 3600);
        let router = build_router(AppState {
            orchestrator,
            poller,
            resolver: Arc::new(resolver),
            token_verifier,
            metrics,
        });
        Self {
            router,
            store,
            gateway,
            tenant_id,
            user_id,
            token,
        }
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, path, Some(body), Some(&self.token))
            .await
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(Method::GET, path, None, Some(&self.token)).await
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.raw(method, path, body, token).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }
}
