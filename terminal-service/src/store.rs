use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::square::CheckoutStatus;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Local mirror of a remote order. Rows are insert-only: the order is the
/// processor's object, we only keep the evidence that we created it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderRecord {
    pub tenant_id: Uuid,
    pub remote_order_id: String,
    pub location_id: String,
    pub customer_id: Option<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub state: String,
    pub amount_minor: i64,
    pub currency: String,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Latest observation of a terminal checkout. `status` carries the
/// processor's vocabulary verbatim; once it reads COMPLETED or CANCELED the
/// row never leaves that state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CheckoutRecord {
    pub tenant_id: Uuid,
    pub remote_checkout_id: String,
    pub remote_order_id: String,
    pub device_id: String,
    pub status: String,
    pub payment_ids: Vec<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutRecord {
    pub fn is_finished(&self) -> bool {
        CheckoutStatus::from_wire(&self.status).is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CashPaymentRecord {
    pub tenant_id: Uuid,
    pub remote_payment_id: String,
    pub remote_order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Storage seam for the orchestrator. Every read and write is scoped by
/// tenant; a row from another tenant behaves exactly like a missing row.
#[async_trait::async_trait]
pub trait CheckoutStore: Send + Sync {
    async fn save_order(&self, order: OrderRecord) -> Result<(), StoreError>;
    /// Upsert the latest checkout observation and return the effective row.
    /// Terminal rows keep their status even when the incoming observation
    /// says otherwise.
    async fn record_checkout(&self, checkout: CheckoutRecord)
        -> Result<CheckoutRecord, StoreError>;
    async fn find_checkout(
        &self,
        tenant_id: Uuid,
        checkout_id: &str,
    ) -> Result<Option<CheckoutRecord>, StoreError>;
    async fn list_unfinished_checkouts(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<CheckoutRecord>, StoreError>;
    /// Orders with neither a checkout nor a cash payment attached; these are
    /// the survivors of partial failures and feed reconciliation.
    async fn list_orphaned_orders(&self, tenant_id: Uuid) -> Result<Vec<OrderRecord>, StoreError>;
    async fn save_cash_payment(&self, payment: CashPaymentRecord) -> Result<(), StoreError>;
    async fn find_membership(&self, user_id: Uuid) -> Result<Option<Membership>, StoreError>;
}

fn merge_observation(existing: &CheckoutRecord, incoming: CheckoutRecord) -> CheckoutRecord {
    if existing.is_finished() {
        let mut kept = existing.clone();
        kept.updated_at = incoming.updated_at;
        return kept;
    }
    let mut merged = incoming;
    merged.created_at = existing.created_at;
    merged
}

/// Mutexed-map store for tests and DB-less local runs. Mirrors the SQL
/// store's semantics, including the sticky-terminal merge.
#[derive(Default)]
pub struct MemoryCheckoutStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    orders: Vec<OrderRecord>,
    checkouts: HashMap<(Uuid, String), CheckoutRecord>,
    cash_payments: Vec<CashPaymentRecord>,
    memberships: HashMap<Uuid, Membership>,
}

impl MemoryCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant_membership(&self, user_id: Uuid, tenant_id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.memberships.insert(
            user_id,
            Membership {
                user_id,
                tenant_id,
                active: true,
                created_at: Utc::now(),
            },
        );
    }

    pub async fn revoke_membership(&self, user_id: Uuid) {
        let mut inner = self.inner.lock().await;
        if let Some(membership) = inner.memberships.get_mut(&user_id) {
            membership.active = false;
        }
    }

    pub async fn orders(&self) -> Vec<OrderRecord> {
        self.inner.lock().await.orders.clone()
    }

    pub async fn cash_payments(&self) -> Vec<CashPaymentRecord> {
        self.inner.lock().await.cash_payments.clone()
    }
}

#[async_trait::async_trait]
impl CheckoutStore for MemoryCheckoutStore {
    async fn save_order(&self, order: OrderRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let exists = inner.orders.iter().any(|existing| {
            existing.tenant_id == order.tenant_id
                && existing.remote_order_id == order.remote_order_id
        });
        if !exists {
            inner.orders.push(order);
        }
        Ok(())
    }

    async fn record_checkout(
        &self,
        checkout: CheckoutRecord,
    ) -> Result<CheckoutRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (checkout.tenant_id, checkout.remote_checkout_id.clone());
        let effective = match inner.checkouts.get(&key) {
            Some(existing) => merge_observation(existing, checkout),
            None => checkout,
        };
        inner.checkouts.insert(key, effective.clone());
        Ok(effective)
    }

    async fn find_checkout(
        &self,
        tenant_id: Uuid,
        checkout_id: &str,
    ) -> Result<Option<CheckoutRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .checkouts
            .get(&(tenant_id, checkout_id.to_owned()))
            .cloned())
    }

    async fn list_unfinished_checkouts(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<CheckoutRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut unfinished: Vec<CheckoutRecord> = inner
            .checkouts
            .values()
            .filter(|checkout| checkout.tenant_id == tenant_id && !checkout.is_finished())
            .cloned()
            .collect();
        unfinished.sort_by_key(|checkout| checkout.created_at);
        Ok(unfinished)
    }

    async fn list_orphaned_orders(&self, tenant_id: Uuid) -> Result<Vec<OrderRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let orphaned = inner
            .orders
            .iter()
            .filter(|order| order.tenant_id == tenant_id)
            .filter(|order| {
                let attached_checkout = inner.checkouts.values().any(|checkout| {
                    checkout.tenant_id == tenant_id
                        && checkout.remote_order_id == order.remote_order_id
                });
                let attached_payment = inner.cash_payments.iter().any(|payment| {
                    payment.tenant_id == tenant_id
                        && payment.remote_order_id == order.remote_order_id
                });
                !attached_checkout && !attached_payment
            })
            .cloned()
            .collect();
        Ok(orphaned)
    }

    async fn save_cash_payment(&self, payment: CashPaymentRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let exists = inner.cash_payments.iter().any(|existing| {
            existing.tenant_id == payment.tenant_id
                && existing.remote_payment_id == payment.remote_payment_id
        });
        if !exists {
            inner.cash_payments.push(payment);
        }
        Ok(())
    }

    async fn find_membership(&self, user_id: Uuid) -> Result<Option<Membership>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .memberships
            .get(&user_id)
            .filter(|membership| membership.active)
            .cloned())
    }
}
