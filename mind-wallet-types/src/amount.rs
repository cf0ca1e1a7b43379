// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Two-decimal fixed-point money.
//!
//! Every ledger balance and every user-visible amount is an [`Amount`]:
//! a non-negative decimal normalised to exactly two fractional digits.
//! Arithmetic happens on integer scaled units ("cents"); floating point
//! never touches money. Conversion to and from on-chain integer units
//! happens at the chain-adapter boundary, not here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed scale: two fractional digits.
pub const SCALE: u32 = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),

    #[error("amount out of representable range")]
    Overflow,

    #[error("invalid amount literal: {0}")]
    Parse(String),
}

/// A non-negative money amount with exactly two fractional digits.
///
/// Construction truncates toward zero to the fixed scale. Truncation is
/// the only rounding mode used anywhere: it can never mint value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Normalise a decimal to an `Amount`. Rejects negatives, truncates
    /// extra fractional digits toward zero.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative(value));
        }
        let mut truncated = value.trunc_with_scale(SCALE);
        truncated.rescale(SCALE);
        Ok(Amount(truncated))
    }

    /// Build from integer scaled units (1 unit = 0.01).
    pub fn from_cents(cents: i64) -> Result<Self, AmountError> {
        if cents < 0 {
            return Err(AmountError::Negative(Decimal::new(cents, SCALE)));
        }
        Ok(Amount(Decimal::new(cents, SCALE)))
    }

    /// Integer scaled units. Exact by construction: the inner decimal
    /// always carries scale 2.
    pub fn cents(&self) -> i64 {
        i64::try_from(self.0.mantissa()).expect("two-decimal amount mantissa fits in i64")
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn checked_add(&self, other: Amount) -> Result<Amount, AmountError> {
        let sum = self
            .cents()
            .checked_add(other.cents())
            .ok_or(AmountError::Overflow)?;
        Amount::from_cents(sum)
    }

    /// Subtraction on the debit path. Fails rather than going negative.
    pub fn checked_sub(&self, other: Amount) -> Result<Amount, AmountError> {
        let diff = self
            .cents()
            .checked_sub(other.cents())
            .ok_or(AmountError::Overflow)?;
        Amount::from_cents(diff)
    }

    /// Saturating subtraction, used where policy tolerates over-draw
    /// (the ledger's lenient unfreeze). Returns the result and how much
    /// was actually movable.
    pub fn saturating_sub(&self, other: Amount) -> (Amount, Amount) {
        let movable = (*self).min(other);
        let rest = Amount::from_cents(self.cents() - movable.cents())
            .expect("min-clamped subtraction cannot underflow");
        (rest, movable)
    }
}

impl Default for Amount {
    fn default() -> Self {
        Amount::ZERO
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(value: Amount) -> Decimal {
        value.0
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let d = Decimal::from_str(s).map_err(|_| AmountError::Parse(s.to_string()))?;
        Amount::new(d)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn test_normalises_to_two_digits() {
        assert_eq!(amt("5").to_string(), "5.00");
        assert_eq!(amt("5.1").to_string(), "5.10");
        assert_eq!(amt("5.10").to_string(), "5.10");
        assert_eq!(amt("0").to_string(), "0.00");
    }

    #[test]
    fn test_truncates_toward_zero() {
        // Never round up: 0.019 is 0.01, not 0.02.
        assert_eq!(amt("0.019"), amt("0.01"));
        assert_eq!(amt("0.999"), amt("0.99"));
        assert_eq!(amt("123.456"), amt("123.45"));
    }

    #[test]
    fn test_rejects_negative() {
        assert!(matches!(
            Amount::new(Decimal::new(-1, 2)),
            Err(AmountError::Negative(_))
        ));
        assert!(matches!(Amount::from_cents(-5), Err(AmountError::Negative(_))));
    }

    #[test]
    fn test_cents_round_trip() {
        assert_eq!(Amount::from_cents(512).unwrap(), amt("5.12"));
        assert_eq!(amt("5.12").cents(), 512);
        assert_eq!(Amount::ZERO.cents(), 0);
    }

    #[test]
    fn test_checked_sub_refuses_negative() {
        assert!(amt("1.00").checked_sub(amt("1.01")).is_err());
        assert_eq!(amt("1.00").checked_sub(amt("1.00")).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_saturating_sub_reports_movable() {
        let (rest, moved) = amt("3.00").saturating_sub(amt("5.00"));
        assert_eq!(rest, Amount::ZERO);
        assert_eq!(moved, amt("3.00"));

        let (rest, moved) = amt("5.00").saturating_sub(amt("3.00"));
        assert_eq!(rest, amt("2.00"));
        assert_eq!(moved, amt("3.00"));
    }

    #[test]
    fn test_serde_json_is_stable() {
        let a = amt("42.05");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"42.05\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_serde_rejects_negative() {
        assert!(serde_json::from_str::<Amount>("\"-1.00\"").is_err());
    }
}
