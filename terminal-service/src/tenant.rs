use std::sync::Arc;

use common_auth::Claims;
use tracing::debug;
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::store::CheckoutStore;

/// Maps a verified caller to the tenant whose data they may touch. The
/// token itself never names a tenant; the membership table is the only
/// source of scope.
pub struct TenantResolver {
    store: Arc<dyn CheckoutStore>,
    dev_tenant: Option<Uuid>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn CheckoutStore>) -> Self {
        Self {
            store,
            dev_tenant: None,
        }
    }

    /// Local-dev fallback tenant for callers without a membership row.
    /// Wired from `DEV_TENANT_ID`; never enable in production.
    pub fn with_dev_tenant(mut self, tenant_id: Uuid) -> Self {
        self.dev_tenant = Some(tenant_id);
        self
    }

    pub async fn resolve_scope(&self, claims: &Claims) -> Result<Uuid, CheckoutError> {
        if let Some(membership) = self.store.find_membership(claims.subject).await? {
            debug!(subject = %claims.subject, tenant_id = %membership.tenant_id, "resolved tenant scope");
            return Ok(membership.tenant_id);
        }
        match self.dev_tenant {
            Some(tenant_id) => {
                debug!(subject = %claims.subject, tenant_id = %tenant_id, "using dev fallback tenant");
                Ok(tenant_id)
            }
            None => Err(CheckoutError::NotAuthorized),
        }
    }
}
