use common_money::Money;
use common_observability::TerminalMetrics;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ServiceConfig;

/// Status vocabulary of a remote terminal checkout. Tokens the processor
/// adds later pass through verbatim as `Other` and are treated as
/// non-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutStatus {
    Pending,
    InProgress,
    CancelRequested,
    Canceled,
    Completed,
    Other(String),
}

impl CheckoutStatus {
    pub fn from_wire(s: &str) -> CheckoutStatus {
        match s {
            "PENDING" => CheckoutStatus::Pending,
            "IN_PROGRESS" => CheckoutStatus::InProgress,
            "CANCEL_REQUESTED" => CheckoutStatus::CancelRequested,
            "CANCELED" => CheckoutStatus::Canceled,
            "COMPLETED" => CheckoutStatus::Completed,
            other => CheckoutStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CheckoutStatus::Pending => "PENDING",
            CheckoutStatus::InProgress => "IN_PROGRESS",
            CheckoutStatus::CancelRequested => "CANCEL_REQUESTED",
            CheckoutStatus::Canceled => "CANCELED",
            CheckoutStatus::Completed => "COMPLETED",
            CheckoutStatus::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutStatus::Completed | CheckoutStatus::Canceled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request to payment processor failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment processor rejected the request ({status} {code}): {detail}")]
    Api {
        status: u16,
        code: String,
        detail: String,
    },
    #[error("payment processor returned an unreadable body: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct OrderLineItem {
    pub name: String,
    pub quantity: u32,
    pub amount: Money,
}

#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub location_id: String,
    pub line_items: Vec<OrderLineItem>,
    pub customer_id: Option<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutDraft {
    pub order_id: String,
    pub device_id: String,
    pub amount: Money,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct CashPaymentDraft {
    pub order_id: String,
    pub amount: Money,
    pub customer_id: Option<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub idempotency_key: String,
}

/// Remote order as the processor reported it. `raw` keeps the untouched
/// response body for the audit trail.
#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub id: String,
    pub state: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct GatewayCheckout {
    pub id: String,
    pub status: CheckoutStatus,
    pub payment_ids: Vec<String>,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub id: String,
    pub status: String,
    pub raw: Value,
}

/// The processor-facing seam. Handlers and the orchestrator only ever see
/// this trait, so tests swap in scripted fakes without touching HTTP.
#[async_trait::async_trait]
pub trait TerminalGateway: Send + Sync {
    async fn create_order(&self, draft: OrderDraft) -> Result<GatewayOrder, GatewayError>;
    async fn create_terminal_checkout(
        &self,
        draft: CheckoutDraft,
    ) -> Result<GatewayCheckout, GatewayError>;
    async fn create_cash_payment(
        &self,
        draft: CashPaymentDraft,
    ) -> Result<GatewayPayment, GatewayError>;
    async fn get_terminal_checkout(&self, checkout_id: &str)
        -> Result<GatewayCheckout, GatewayError>;
    async fn cancel_terminal_checkout(
        &self,
        checkout_id: &str,
    ) -> Result<GatewayCheckout, GatewayError>;
}

pub struct SquareClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    api_version: String,
    metrics: TerminalMetrics,
}

impl SquareClient {
    pub fn new(config: &ServiceConfig, metrics: TerminalMetrics) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.gateway_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.square_api_url.trim_end_matches('/').to_string(),
            access_token: config.square_access_token.clone(),
            api_version: config.square_version.clone(),
            metrics,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token)
            .header("Square-Version", &self.api_version)
    }

    async fn execute(
        &self,
        endpoint: &'static str,
        builder: reqwest::RequestBuilder,
    ) -> Result<Value, GatewayError> {
        let outcome = dispatch(builder).await;
        self.metrics
            .record_processor_request(endpoint, outcome.is_ok());
        outcome
    }
}

async fn dispatch(builder: reqwest::RequestBuilder) -> Result<Value, GatewayError> {
    let response = builder.send().await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(unwrap_api_error(status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(|err| GatewayError::Decode(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct ProcessorErrorBody {
    #[serde(default)]
    errors: Vec<ProcessorErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ProcessorErrorEntry {
    #[serde(default)]
    category: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    detail: Option<String>,
}

/// Pull the first entry out of the processor's
/// `{"errors": [{category, code, detail}]}` envelope; anything unparseable
/// is surfaced whole so nothing is lost from the log line.
fn unwrap_api_error(status: u16, body: &str) -> GatewayError {
    let parsed: Option<ProcessorErrorEntry> = serde_json::from_str::<ProcessorErrorBody>(body)
        .ok()
        .and_then(|envelope| envelope.errors.into_iter().next());
    match parsed {
        Some(entry) => GatewayError::Api {
            status,
            code: if entry.code.is_empty() {
                "UNKNOWN".to_string()
            } else {
                entry.code
            },
            detail: entry.detail.unwrap_or(entry.category),
        },
        None => GatewayError::Api {
            status,
            code: "UNKNOWN".to_string(),
            detail: body.to_string(),
        },
    }
}

fn parse_order(raw: Value) -> Result<GatewayOrder, GatewayError> {
    let obj = raw.get("order").unwrap_or(&raw);
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Decode("order response missing id".to_string()))?
        .to_owned();
    let state = obj
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    Ok(GatewayOrder { id, state, raw })
}

fn parse_checkout(raw: Value) -> Result<GatewayCheckout, GatewayError> {
    let obj = raw.get("checkout").unwrap_or(&raw);
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Decode("checkout response missing id".to_string()))?
        .to_owned();
    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .map(CheckoutStatus::from_wire)
        .ok_or_else(|| GatewayError::Decode("checkout response missing status".to_string()))?;
    let payment_ids = obj
        .get("payment_ids")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    Ok(GatewayCheckout {
        id,
        status,
        payment_ids,
        raw,
    })
}

fn parse_payment(raw: Value) -> Result<GatewayPayment, GatewayError> {
    let obj = raw.get("payment").unwrap_or(&raw);
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Decode("payment response missing id".to_string()))?
        .to_owned();
    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    Ok(GatewayPayment { id, status, raw })
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    idempotency_key: &'a str,
    order: OrderBody<'a>,
}

#[derive(Serialize)]
struct OrderBody<'a> {
    location_id: &'a str,
    line_items: Vec<LineItemBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

#[derive(Serialize)]
struct LineItemBody<'a> {
    name: &'a str,
    // The processor wants the count as a string, not a number.
    quantity: String,
    base_price_money: &'a Money,
}

#[derive(Serialize)]
struct CreateCheckoutBody<'a> {
    idempotency_key: &'a str,
    checkout: CheckoutBody<'a>,
}

#[derive(Serialize)]
struct CheckoutBody<'a> {
    amount_money: &'a Money,
    order_id: &'a str,
    device_options: DeviceOptionsBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

#[derive(Serialize)]
struct DeviceOptionsBody<'a> {
    device_id: &'a str,
}

#[derive(Serialize)]
struct CreatePaymentBody<'a> {
    idempotency_key: &'a str,
    source_id: &'a str,
    amount_money: &'a Money,
    autocomplete: bool,
    order_id: &'a str,
    cash_details: CashDetailsBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

#[derive(Serialize)]
struct CashDetailsBody<'a> {
    buyer_supplied_money: &'a Money,
}

#[async_trait::async_trait]
impl TerminalGateway for SquareClient {
    async fn create_order(&self, draft: OrderDraft) -> Result<GatewayOrder, GatewayError> {
        let line_items: Vec<LineItemBody> = draft
            .line_items
            .iter()
            .map(|item| LineItemBody {
                name: &item.name,
                quantity: item.quantity.to_string(),
                base_price_money: &item.amount,
            })
            .collect();
        let body = CreateOrderBody {
            idempotency_key: &draft.idempotency_key,
            order: OrderBody {
                location_id: &draft.location_id,
                line_items,
                customer_id: draft.customer_id.as_deref(),
                reference_id: draft.reference_id.as_deref(),
                note: draft.note.as_deref(),
            },
        };
        let raw = self
            .execute(
                "create_order",
                self.request(Method::POST, "/v2/orders").json(&body),
            )
            .await?;
        parse_order(raw)
    }

    async fn create_terminal_checkout(
        &self,
        draft: CheckoutDraft,
    ) -> Result<GatewayCheckout, GatewayError> {
        let body = CreateCheckoutBody {
            idempotency_key: &draft.idempotency_key,
            checkout: CheckoutBody {
                amount_money: &draft.amount,
                order_id: &draft.order_id,
                device_options: DeviceOptionsBody {
                    device_id: &draft.device_id,
                },
                reference_id: draft.reference_id.as_deref(),
                note: draft.note.as_deref(),
            },
        };
        let raw = self
            .execute(
                "create_checkout",
                self.request(Method::POST, "/v2/terminals/checkouts")
                    .json(&body),
            )
            .await?;
        parse_checkout(raw)
    }

    async fn create_cash_payment(
        &self,
        draft: CashPaymentDraft,
    ) -> Result<GatewayPayment, GatewayError> {
        let body = CreatePaymentBody {
            idempotency_key: &draft.idempotency_key,
            source_id: "CASH",
            amount_money: &draft.amount,
            autocomplete: true,
            order_id: &draft.order_id,
            cash_details: CashDetailsBody {
                buyer_supplied_money: &draft.amount,
            },
            customer_id: draft.customer_id.as_deref(),
            reference_id: draft.reference_id.as_deref(),
            note: draft.note.as_deref(),
        };
        let raw = self
            .execute(
                "create_payment",
                self.request(Method::POST, "/v2/payments").json(&body),
            )
            .await?;
        parse_payment(raw)
    }

    async fn get_terminal_checkout(
        &self,
        checkout_id: &str,
    ) -> Result<GatewayCheckout, GatewayError> {
        let raw = self
            .execute(
                "get_checkout",
                self.request(
                    Method::GET,
                    &format!("/v2/terminals/checkouts/{checkout_id}"),
                ),
            )
            .await?;
        parse_checkout(raw)
    }

    async fn cancel_terminal_checkout(
        &self,
        checkout_id: &str,
    ) -> Result<GatewayCheckout, GatewayError> {
        let raw = self
            .execute(
                "cancel_checkout",
                self.request(
                    Method::POST,
                    &format!("/v2/terminals/checkouts/{checkout_id}/cancel"),
                ),
            )
            .await?;
        parse_checkout(raw)
    }
}
