use common_http_errors::ApiError;

use crate::square::GatewayError;
use crate::store::StoreError;

/// Everything a checkout operation can fail with, before it is flattened
/// into the HTTP envelope. A cross-tenant lookup fails exactly like a
/// missing row, so `NotFound` never leaks another tenant's data.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },
    #[error("caller has no active tenant membership")]
    NotAuthorized,
    #[error("checkout not found")]
    NotFound,
    #[error("payment processor call failed during {phase}: {source}")]
    Gateway {
        phase: &'static str,
        #[source]
        source: GatewayError,
    },
    #[error("terminal checkout could not be attached to order {order_id}: {detail}")]
    CheckoutCreationFailed { order_id: String, detail: String },
    #[error("cash payment could not be attached to order {order_id}: {detail}")]
    CashPaymentFailed { order_id: String, detail: String },
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl CheckoutError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::Validation { code, .. } => code,
            CheckoutError::NotAuthorized => "not_authorized",
            CheckoutError::NotFound => "checkout_not_found",
            CheckoutError::Gateway { .. } => "gateway_error",
            CheckoutError::CheckoutCreationFailed { .. } => "checkout_creation_failed",
            CheckoutError::CashPaymentFailed { .. } => "cash_payment_failed",
            CheckoutError::Storage(_) => "storage_error",
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        let code = err.code();
        let message = err.to_string();
        match err {
            CheckoutError::Validation { .. } => ApiError::bad_request(code, message),
            CheckoutError::NotAuthorized => ApiError::unauthorized(code, message),
            CheckoutError::NotFound => ApiError::not_found(code, message),
            CheckoutError::Gateway { .. }
            | CheckoutError::CheckoutCreationFailed { .. }
            | CheckoutError::CashPaymentFailed { .. }
            | CheckoutError::Storage(_) => ApiError::internal_coded(code, message),
        }
    }
}
