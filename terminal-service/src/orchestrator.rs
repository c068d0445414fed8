use std::sync::Arc;

use chrono::Utc;
use common_money::{cart_total, Money};
use common_observability::TerminalMetrics;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::CheckoutError;
use crate::square::{
    CashPaymentDraft, CheckoutDraft, CheckoutStatus, GatewayCheckout, OrderDraft, OrderLineItem,
    TerminalGateway,
};
use crate::store::{CashPaymentRecord, CheckoutRecord, CheckoutStore, OrderRecord};

const CUSTOM_AMOUNT_NAME: &str = "Custom Amount";

#[derive(Debug, Clone, Deserialize)]
pub struct CardCheckoutRequest {
    pub device_id: String,
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub square_customer_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemInput {
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub amount_cents: i64,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct CashPaymentRequest {
    pub amount_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub square_customer_id: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    pub refreshed: usize,
    pub completed: usize,
    pub canceled: usize,
    pub still_pending: usize,
    pub orphaned_order_ids: Vec<String>,
}

/// Drives every sale through the same sequence: remote order first, then
/// the attached checkout or cash payment, persisting each step. Remote
/// side effects are never rolled back; a failure in the second phase
/// surfaces the order id so reconciliation can pick it up.
pub struct CheckoutOrchestrator {
    gateway: Arc<dyn TerminalGateway>,
    store: Arc<dyn CheckoutStore>,
    metrics: TerminalMetrics,
    location_id: String,
    default_currency: String,
}

impl CheckoutOrchestrator {
    pub fn new(
        gateway: Arc<dyn TerminalGateway>,
        store: Arc<dyn CheckoutStore>,
        metrics: TerminalMetrics,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            metrics,
            location_id: config.square_location_id.clone(),
            default_currency: config.default_currency.clone(),
        }
    }

    pub async fn begin_card_checkout(
        &self,
        tenant_id: Uuid,
        request: CardCheckoutRequest,
    ) -> Result<CheckoutRecord, CheckoutError> {
        let device_id = request.device_id.trim().to_owned();
        if device_id.is_empty() {
            return Err(CheckoutError::validation(
                "device_required",
                "device_id must not be empty",
            ));
        }
        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());
        let has_items = !request.items.is_empty();
        let (line_items, total_minor) = match (request.amount_cents, has_items) {
            (Some(_), true) => {
                return Err(CheckoutError::validation(
                    "amount_conflict",
                    "supply either amount_cents or items, not both",
                ))
            }
            (Some(amount), false) => {
                let money = Money::positive(amount, currency.as_str()).map_err(|err| {
                    CheckoutError::validation("amount_not_positive", err.to_string())
                })?;
                let total = money.amount;
                (
                    vec![OrderLineItem {
                        name: CUSTOM_AMOUNT_NAME.to_owned(),
                        quantity: 1,
                        amount: money,
                    }],
                    total,
                )
            }
            (None, true) => build_line_items(&request.items, &currency)?,
            (None, false) => {
                return Err(CheckoutError::validation(
                    "amount_required",
                    "supply amount_cents or a non-empty items list",
                ))
            }
        };

        let keys = IdempotencyKeys::derive(tenant_id, request.reference_id.as_deref());

        let order = self
            .gateway
            .create_order(OrderDraft {
                location_id: self.location_id.clone(),
                line_items,
                customer_id: request.square_customer_id.clone(),
                reference_id: request.reference_id.clone(),
                note: request.note.clone(),
                idempotency_key: keys.order,
            })
            .await
            .map_err(|source| CheckoutError::Gateway {
                phase: "order_create",
                source,
            })?;

        let now = Utc::now();
        self.store
            .save_order(OrderRecord {
                tenant_id,
                remote_order_id: order.id.clone(),
                location_id: self.location_id.clone(),
                customer_id: request.square_customer_id.clone(),
                reference_id: request.reference_id.clone(),
                note: request.note.clone(),
                state: order.state.clone(),
                amount_minor: total_minor,
                currency: currency.clone(),
                raw: order.raw.clone(),
                created_at: now,
            })
            .await
            .map_err(|err| {
                error!(order_id = %order.id, error = %err, "remote order created but could not be recorded locally");
                CheckoutError::from(err)
            })?;

        let checkout = match self
            .gateway
            .create_terminal_checkout(CheckoutDraft {
                order_id: order.id.clone(),
                device_id: device_id.clone(),
                amount: Money::from_minor(total_minor, currency.as_str()),
                reference_id: request.reference_id.clone(),
                note: request.note.clone(),
                idempotency_key: keys.checkout,
            })
            .await
        {
            Ok(checkout) => checkout,
            Err(err) => {
                error!(order_id = %order.id, error = %err, "terminal checkout creation failed; order is orphaned until reconciled");
                return Err(CheckoutError::CheckoutCreationFailed {
                    order_id: order.id,
                    detail: err.to_string(),
                });
            }
        };

        let record = self
            .store
            .record_checkout(CheckoutRecord {
                tenant_id,
                remote_checkout_id: checkout.id.clone(),
                remote_order_id: order.id.clone(),
                device_id,
                status: checkout.status.as_str().to_owned(),
                payment_ids: checkout.payment_ids,
                reference_id: request.reference_id,
                note: request.note,
                raw: checkout.raw,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(|err| {
                error!(checkout_id = %checkout.id, order_id = %order.id, error = %err, "terminal checkout created but could not be recorded locally");
                CheckoutError::from(err)
            })?;

        info!(
            order_id = %record.remote_order_id,
            checkout_id = %record.remote_checkout_id,
            status = %record.status,
            "terminal checkout started"
        );
        Ok(record)
    }

    pub async fn begin_cash_checkout(
        &self,
        tenant_id: Uuid,
        request: CashPaymentRequest,
    ) -> Result<CashPaymentRecord, CheckoutError> {
        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());
        let amount = Money::positive(request.amount_cents, currency.as_str())
            .map_err(|err| CheckoutError::validation("amount_not_positive", err.to_string()))?;

        let keys = IdempotencyKeys::derive(tenant_id, request.reference_id.as_deref());

        let order = self
            .gateway
            .create_order(OrderDraft {
                location_id: self.location_id.clone(),
                line_items: vec![OrderLineItem {
                    name: CUSTOM_AMOUNT_NAME.to_owned(),
                    quantity: 1,
                    amount: amount.clone(),
                }],
                customer_id: request.square_customer_id.clone(),
                reference_id: request.reference_id.clone(),
                note: request.note.clone(),
                idempotency_key: keys.order,
            })
            .await
            .map_err(|source| CheckoutError::Gateway {
                phase: "order_create",
                source,
            })?;

        let now = Utc::now();
        self.store
            .save_order(OrderRecord {
                tenant_id,
                remote_order_id: order.id.clone(),
                location_id: self.location_id.clone(),
                customer_id: request.square_customer_id.clone(),
                reference_id: request.reference_id.clone(),
                note: request.note.clone(),
                state: order.state.clone(),
                amount_minor: amount.amount,
                currency: currency.clone(),
                raw: order.raw.clone(),
                created_at: now,
            })
            .await
            .map_err(|err| {
                error!(order_id = %order.id, error = %err, "remote order created but could not be recorded locally");
                CheckoutError::from(err)
            })?;

        let payment = match self
            .gateway
            .create_cash_payment(CashPaymentDraft {
                order_id: order.id.clone(),
                amount: amount.clone(),
                customer_id: request.square_customer_id,
                reference_id: request.reference_id,
                note: request.note,
                idempotency_key: keys.payment,
            })
            .await
        {
            Ok(payment) => payment,
            Err(err) => {
                error!(order_id = %order.id, error = %err, "cash payment failed; order is orphaned until reconciled");
                return Err(CheckoutError::CashPaymentFailed {
                    order_id: order.id,
                    detail: err.to_string(),
                });
            }
        };

        let record = CashPaymentRecord {
            tenant_id,
            remote_payment_id: payment.id.clone(),
            remote_order_id: order.id.clone(),
            amount_minor: amount.amount,
            currency,
            status: if payment.status.is_empty() {
                "COMPLETED".to_owned()
            } else {
                payment.status.clone()
            },
            raw: payment.raw.clone(),
            created_at: now,
        };
        self.store
            .save_cash_payment(record.clone())
            .await
            .map_err(|err| {
                error!(payment_id = %payment.id, order_id = %order.id, error = %err, "cash payment completed remotely but could not be recorded locally");
                CheckoutError::from(err)
            })?;

        self.metrics.record_checkout_outcome("cash", &record.status);
        info!(
            order_id = %record.remote_order_id,
            payment_id = %record.remote_payment_id,
            "cash payment completed"
        );
        Ok(record)
    }

    /// Scoped local lookup; a foreign tenant's checkout id misses exactly
    /// like an unknown one.
    pub async fn find_checkout(
        &self,
        tenant_id: Uuid,
        checkout_id: &str,
    ) -> Result<CheckoutRecord, CheckoutError> {
        self.store
            .find_checkout(tenant_id, checkout_id)
            .await?
            .ok_or(CheckoutError::NotFound)
    }

    /// Current status of a checkout. Finished checkouts are answered from
    /// the local record; everything else is refreshed from the processor
    /// and the observation persisted.
    pub async fn checkout_status(
        &self,
        tenant_id: Uuid,
        checkout_id: &str,
    ) -> Result<CheckoutRecord, CheckoutError> {
        let local = self.find_checkout(tenant_id, checkout_id).await?;
        if local.is_finished() {
            return Ok(local);
        }
        let observed = self
            .gateway
            .get_terminal_checkout(&local.remote_checkout_id)
            .await
            .map_err(|source| CheckoutError::Gateway {
                phase: "status_query",
                source,
            })?;
        self.persist_observation(tenant_id, &local, observed).await
    }

    /// Ask the processor to cancel. Whatever it answers is persisted and
    /// returned; when the payment already completed the effective record
    /// says COMPLETED and the caller sees that the cancel was not honored.
    pub async fn cancel_checkout(
        &self,
        tenant_id: Uuid,
        checkout_id: &str,
    ) -> Result<CheckoutRecord, CheckoutError> {
        let local = self.find_checkout(tenant_id, checkout_id).await?;
        if local.is_finished() {
            return Ok(local);
        }
        let observed = self
            .gateway
            .cancel_terminal_checkout(&local.remote_checkout_id)
            .await
            .map_err(|source| CheckoutError::Gateway {
                phase: "cancel",
                source,
            })?;
        let effective = self.persist_observation(tenant_id, &local, observed).await?;
        if CheckoutStatus::from_wire(&effective.status) == CheckoutStatus::Completed {
            info!(
                checkout_id = %effective.remote_checkout_id,
                "cancel raced a completed payment; keeping COMPLETED"
            );
        }
        Ok(effective)
    }

    /// Refresh every unfinished checkout in the tenant's scope and report
    /// orders left behind by partial failures.
    pub async fn reconcile(&self, tenant_id: Uuid) -> Result<ReconcileReport, CheckoutError> {
        let mut report = ReconcileReport::default();
        for checkout in self.store.list_unfinished_checkouts(tenant_id).await? {
            match self
                .gateway
                .get_terminal_checkout(&checkout.remote_checkout_id)
                .await
            {
                Ok(observed) => {
                    let effective = self
                        .persist_observation(tenant_id, &checkout, observed)
                        .await?;
                    report.refreshed += 1;
                    match CheckoutStatus::from_wire(&effective.status) {
                        CheckoutStatus::Completed => report.completed += 1,
                        CheckoutStatus::Canceled => report.canceled += 1,
                        _ => report.still_pending += 1,
                    }
                }
                Err(err) => {
                    warn!(
                        checkout_id = %checkout.remote_checkout_id,
                        error = %err,
                        "reconcile could not refresh checkout"
                    );
                    report.still_pending += 1;
                }
            }
        }
        report.orphaned_order_ids = self
            .store
            .list_orphaned_orders(tenant_id)
            .await?
            .into_iter()
            .map(|order| order.remote_order_id)
            .collect();
        if !report.orphaned_order_ids.is_empty() {
            warn!(
                count = report.orphaned_order_ids.len(),
                "orders without an attached checkout or payment"
            );
        }
        Ok(report)
    }

    pub async fn list_unfinished(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<CheckoutRecord>, CheckoutError> {
        Ok(self.store.list_unfinished_checkouts(tenant_id).await?)
    }

    async fn persist_observation(
        &self,
        tenant_id: Uuid,
        local: &CheckoutRecord,
        observed: GatewayCheckout,
    ) -> Result<CheckoutRecord, CheckoutError> {
        let was_finished = local.is_finished();
        let incoming = CheckoutRecord {
            tenant_id,
            remote_checkout_id: local.remote_checkout_id.clone(),
            remote_order_id: local.remote_order_id.clone(),
            device_id: local.device_id.clone(),
            status: observed.status.as_str().to_owned(),
            payment_ids: observed.payment_ids,
            reference_id: local.reference_id.clone(),
            note: local.note.clone(),
            raw: observed.raw,
            created_at: local.created_at,
            updated_at: Utc::now(),
        };
        let effective = self.store.record_checkout(incoming).await.map_err(|err| {
            error!(
                checkout_id = %local.remote_checkout_id,
                error = %err,
                "failed to persist checkout status observation"
            );
            CheckoutError::from(err)
        })?;
        if !was_finished && effective.is_finished() {
            self.metrics
                .record_checkout_outcome("card", &effective.status);
        }
        Ok(effective)
    }
}

fn build_line_items(
    items: &[LineItemInput],
    currency: &str,
) -> Result<(Vec<OrderLineItem>, i64), CheckoutError> {
    for item in items {
        if item.name.trim().is_empty() {
            return Err(CheckoutError::validation(
                "item_name_required",
                "every line item needs a name",
            ));
        }
    }
    let total = cart_total(items.iter().map(|item| (item.amount_cents, item.quantity)))
        .map_err(|err| CheckoutError::validation("invalid_line_items", err.to_string()))?;
    let line_items = items
        .iter()
        .map(|item| OrderLineItem {
            name: item.name.trim().to_owned(),
            quantity: item.quantity,
            amount: Money::from_minor(item.amount_cents, currency),
        })
        .collect();
    Ok((line_items, total))
}

struct IdempotencyKeys {
    order: String,
    checkout: String,
    payment: String,
}

impl IdempotencyKeys {
    /// One key per remote phase, never shared. With a caller reference the
    /// derivation is stable, so a retried sale replays the same keys and
    /// the processor dedupes instead of double-charging.
    fn derive(tenant_id: Uuid, reference_id: Option<&str>) -> Self {
        match reference_id {
            Some(reference) => Self {
                order: phase_key(tenant_id, "order", reference),
                checkout: phase_key(tenant_id, "checkout", reference),
                payment: phase_key(tenant_id, "payment", reference),
            },
            None => Self {
                order: Uuid::new_v4().to_string(),
                checkout: Uuid::new_v4().to_string(),
                payment: Uuid::new_v4().to_string(),
            },
        }
    }
}

fn phase_key(tenant_id: Uuid, phase: &str, reference: &str) -> String {
    // UUIDv5 keeps derived keys inside the processor's 45-char key limit
    // while staying deterministic per (tenant, phase, reference).
    Uuid::new_v5(&tenant_id, format!("{phase}:{reference}").as_bytes()).to_string()
}
