use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{
    CashPaymentRecord, CheckoutRecord, CheckoutStore, Membership, OrderRecord, StoreError,
};

/// Postgres-backed store. The sticky-terminal rule lives inside the upsert
/// itself so concurrent writers cannot downgrade a finished checkout.
pub struct PgCheckoutStore {
    pool: PgPool,
}

impl PgCheckoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl CheckoutStore for PgCheckoutStore {
    async fn save_order(&self, order: OrderRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO orders (tenant_id, remote_order_id, location_id, customer_id, reference_id, note, state, amount_minor, currency, raw, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               ON CONFLICT (tenant_id, remote_order_id) DO NOTHING"#,
        )
        .bind(order.tenant_id)
        .bind(&order.remote_order_id)
        .bind(&order.location_id)
        .bind(&order.customer_id)
        .bind(&order.reference_id)
        .bind(&order.note)
        .bind(&order.state)
        .bind(order.amount_minor)
        .bind(&order.currency)
        .bind(&order.raw)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_checkout(
        &self,
        checkout: CheckoutRecord,
    ) -> Result<CheckoutRecord, StoreError> {
        let effective = sqlx::query_as::<_, CheckoutRecord>(
            r#"INSERT INTO terminal_checkouts (tenant_id, remote_checkout_id, remote_order_id, device_id, status, payment_ids, reference_id, note, raw, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               ON CONFLICT (tenant_id, remote_checkout_id) DO UPDATE SET
                   status = CASE WHEN terminal_checkouts.status IN ('COMPLETED', 'CANCELED')
                                 THEN terminal_checkouts.status ELSE EXCLUDED.status END,
                   payment_ids = CASE WHEN terminal_checkouts.status IN ('COMPLETED', 'CANCELED')
                                      THEN terminal_checkouts.payment_ids ELSE EXCLUDED.payment_ids END,
                   raw = CASE WHEN terminal_checkouts.status IN ('COMPLETED', 'CANCELED')
                              THEN terminal_checkouts.raw ELSE EXCLUDED.raw END,
                   updated_at = EXCLUDED.updated_at
               RETURNING tenant_id, remote_checkout_id, remote_order_id, device_id, status, payment_ids, reference_id, note, raw, created_at, updated_at"#,
        )
        .bind(checkout.tenant_id)
        .bind(&checkout.remote_checkout_id)
        .bind(&checkout.remote_order_id)
        .bind(&checkout.device_id)
        .bind(&checkout.status)
        .bind(&checkout.payment_ids)
        .bind(&checkout.reference_id)
        .bind(&checkout.note)
        .bind(&checkout.raw)
        .bind(checkout.created_at)
        .bind(checkout.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(effective)
    }

    async fn find_checkout(
        &self,
        tenant_id: Uuid,
        checkout_id: &str,
    ) -> Result<Option<CheckoutRecord>, StoreError> {
        let record = sqlx::query_as::<_, CheckoutRecord>(
            r#"SELECT tenant_id, remote_checkout_id, remote_order_id, device_id, status, payment_ids, reference_id, note, raw, created_at, updated_at
               FROM terminal_checkouts
               WHERE tenant_id = $1 AND remote_checkout_id = $2"#,
        )
        .bind(tenant_id)
        .bind(checkout_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_unfinished_checkouts(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<CheckoutRecord>, StoreError> {
        let records = sqlx::query_as::<_, CheckoutRecord>(
            r#"SELECT tenant_id, remote_checkout_id, remote_order_id, device_id, status, payment_ids, reference_id, note, raw, created_at, updated_at
               FROM terminal_checkouts
               WHERE tenant_id = $1 AND status NOT IN ('COMPLETED', 'CANCELED')
               ORDER BY created_at"#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_orphaned_orders(&self, tenant_id: Uuid) -> Result<Vec<OrderRecord>, StoreError> {
        let records = sqlx::query_as::<_, OrderRecord>(
            r#"SELECT o.tenant_id, o.remote_order_id, o.location_id, o.customer_id, o.reference_id, o.note, o.state, o.amount_minor, o.currency, o.raw, o.created_at
               FROM orders o
               WHERE o.tenant_id = $1
                 AND NOT EXISTS (
                     SELECT 1 FROM terminal_checkouts c
                     WHERE c.tenant_id = o.tenant_id AND c.remote_order_id = o.remote_order_id)
                 AND NOT EXISTS (
                     SELECT 1 FROM cash_payments p
                     WHERE p.tenant_id = o.tenant_id AND p.remote_order_id = o.remote_order_id)
               ORDER BY o.created_at"#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn save_cash_payment(&self, payment: CashPaymentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO cash_payments (tenant_id, remote_payment_id, remote_order_id, amount_minor, currency, status, raw, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (tenant_id, remote_payment_id) DO NOTHING"#,
        )
        .bind(payment.tenant_id)
        .bind(&payment.remote_payment_id)
        .bind(&payment.remote_order_id)
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(&payment.status)
        .bind(&payment.raw)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_membership(&self, user_id: Uuid) -> Result<Option<Membership>, StoreError> {
        let membership = sqlx::query_as::<_, Membership>(
            r#"SELECT user_id, tenant_id, active, created_at
               FROM memberships
               WHERE user_id = $1 AND active
               ORDER BY created_at
               LIMIT 1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }
}
