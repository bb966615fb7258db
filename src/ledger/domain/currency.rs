use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Number of decimal places kept for amounts converted to the base currency.
const BASE_AMOUNT_DECIMALS: u32 = 2;

/// Normalize a user provided currency code.
///
/// # Returns
///
/// The upper-cased code, or [`None`] if the input is not a three letter
/// alphabetic code.
///
/// # Examples
///
/// ```
/// # use finance_ledger::ledger::domain::currency::normalize_code;
/// assert_eq!(Some("SEK".to_owned()), normalize_code(" sek "));
/// assert_eq!(None, normalize_code("kr"));
/// ```
pub fn normalize_code(raw_code: &str) -> Option<String> {
    let code = raw_code.trim();

    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

/// The result of converting an amount into the base currency.
///
/// A rate of zero means no rate was available when the transaction was
/// written. The converted amount is zero as well in that case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    rate: Decimal,
    amount_in_base: Decimal,
}

impl Conversion {
    /// Convert `amount` using `rate`, expressed in base units per unit of the
    /// amount's currency.
    ///
    /// # Returns
    ///
    /// The conversion, or [`None`] if the converted amount does not fit a
    /// decimal.
    pub fn at_rate(rate: Decimal, amount: Decimal) -> Option<Self> {
        if rate.is_zero() {
            return Some(Self::unavailable());
        }

        let amount_in_base = amount.checked_mul(rate)?.round_dp(BASE_AMOUNT_DECIMALS);

        Some(Self {
            rate,
            amount_in_base,
        })
    }

    /// The conversion recorded when no exchange rate could be determined.
    pub fn unavailable() -> Self {
        Self {
            rate: Decimal::ZERO,
            amount_in_base: Decimal::ZERO,
        }
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub fn amount_in_base(&self) -> Decimal {
        self.amount_in_base
    }

    pub fn is_available(&self) -> bool {
        !self.rate.is_zero()
    }
}
