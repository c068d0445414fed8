use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be positive, got {0}")]
    NonPositive(i64),
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    #[error("total overflows the minor-unit range")]
    Overflow,
}

/// Monetary value in the currency's minor unit (cents for USD).
///
/// This is exactly the gateway's wire object (`{"amount": 1999, "currency": "USD"}`),
/// so it serializes without conversion. Amounts are integers end to end; no
/// floating point exists anywhere on the money path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: i64,
    pub currency: String,
}

impl Money {
    pub fn from_minor(amount: i64, currency: impl Into<String>) -> Self {
        Self { amount, currency: currency.into() }
    }

    /// Construct a charge amount, rejecting zero and negative values.
    pub fn positive(amount: i64, currency: impl Into<String>) -> Result<Self, MoneyError> {
        if amount <= 0 {
            return Err(MoneyError::NonPositive(amount));
        }
        Ok(Self::from_minor(amount, currency))
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }
}

/// Minor-unit total for one line: unit price times quantity, overflow-checked.
pub fn line_total(unit_minor: i64, quantity: u32) -> Result<i64, MoneyError> {
    if unit_minor <= 0 {
        return Err(MoneyError::NonPositive(unit_minor));
    }
    if quantity == 0 {
        return Err(MoneyError::ZeroQuantity);
    }
    unit_minor
        .checked_mul(i64::from(quantity))
        .ok_or(MoneyError::Overflow)
}

/// Minor-unit total for a cart of `(unit_minor, quantity)` lines.
pub fn cart_total<I>(lines: I) -> Result<i64, MoneyError>
where
    I: IntoIterator<Item = (i64, u32)>,
{
    let mut total: i64 = 0;
    for (unit, quantity) in lines {
        let line = line_total(unit, quantity)?;
        total = total.checked_add(line).ok_or(MoneyError::Overflow)?;
    }
    if total <= 0 {
        return Err(MoneyError::NonPositive(total));
    }
    Ok(total)
}
