//! Major/minor unit conversions and processor fee estimates.
//!
//! All arithmetic stays in `BigDecimal`; amounts are rounded half-up to the
//! cent only when crossing into minor units.

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use std::str::FromStr;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::PaymentMethodKind;

pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Bank debit: 0.8% capped at 5.00.
const BANK_DEBIT_RATE: &str = "0.008";
const BANK_DEBIT_CAP: &str = "5.00";

/// Card: 2.9% + 0.30.
const CARD_RATE: &str = "0.029";
const CARD_FIXED: &str = "0.30";

fn decimal(value: &str) -> BigDecimal {
    // Constants above are valid literals.
    BigDecimal::from_str(value).unwrap_or_else(|_| BigDecimal::zero())
}

/// Rounds a major-unit amount to cents.
pub fn round_major(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(2, RoundingMode::HalfUp)
}

pub fn to_minor_units(amount: &BigDecimal) -> PaymentResult<i64> {
    let cents = (amount * BigDecimal::from(MINOR_UNITS_PER_MAJOR))
        .with_scale_round(0, RoundingMode::HalfUp);
    cents.to_i64().ok_or_else(|| PaymentError::ValidationError {
        message: format!("amount {} is out of range", amount),
        field: Some("amount".to_string()),
    })
}

pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::new(minor.into(), 2)
}

pub fn estimate_bank_debit_fee(amount: &BigDecimal) -> BigDecimal {
    let fee = round_major(&(amount * decimal(BANK_DEBIT_RATE)));
    let cap = decimal(BANK_DEBIT_CAP);
    if fee > cap {
        cap
    } else {
        fee
    }
}

pub fn estimate_card_fee(amount: &BigDecimal) -> BigDecimal {
    round_major(&(amount * decimal(CARD_RATE) + decimal(CARD_FIXED)))
}

pub fn estimate_fee(kind: PaymentMethodKind, amount: &BigDecimal) -> BigDecimal {
    match kind {
        PaymentMethodKind::Bank => estimate_bank_debit_fee(amount),
        PaymentMethodKind::Card => estimate_card_fee(amount),
    }
}
