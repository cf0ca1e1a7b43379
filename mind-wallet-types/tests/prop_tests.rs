// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Property tests for the fixed-point amount arithmetic.

use mind_wallet_types::Amount;
use proptest::prelude::*;
use rust_decimal::Decimal;

proptest! {
    /// Any non-negative decimal normalises without minting value:
    /// the result is within one cent below the input, never above.
    #[test]
    fn normalisation_truncates_toward_zero(mantissa in 0i64..=i64::MAX / 2, scale in 0u32..=8) {
        let d = Decimal::new(mantissa, scale);
        let a = Amount::new(d).unwrap();
        prop_assert!(a.as_decimal() <= d);
        prop_assert!(d - a.as_decimal() < Decimal::new(1, 2));
    }

    /// Cents round-trip exactly.
    #[test]
    fn cents_round_trip(cents in 0i64..=i64::MAX / 4) {
        let a = Amount::from_cents(cents).unwrap();
        prop_assert_eq!(a.cents(), cents);
        prop_assert_eq!(Amount::from_cents(a.cents()).unwrap(), a);
    }

    /// add-then-sub is the identity when it does not overflow.
    #[test]
    fn add_sub_identity(a in 0i64..=1_000_000_000i64, b in 0i64..=1_000_000_000i64) {
        let x = Amount::from_cents(a).unwrap();
        let y = Amount::from_cents(b).unwrap();
        let sum = x.checked_add(y).unwrap();
        prop_assert_eq!(sum.checked_sub(y).unwrap(), x);
    }

    /// Saturating subtraction conserves value: rest + moved == self,
    /// and moved never exceeds the requested amount.
    #[test]
    fn saturating_sub_conserves(a in 0i64..=1_000_000_000i64, b in 0i64..=1_000_000_000i64) {
        let x = Amount::from_cents(a).unwrap();
        let y = Amount::from_cents(b).unwrap();
        let (rest, moved) = x.saturating_sub(y);
        prop_assert_eq!(rest.checked_add(moved).unwrap(), x);
        prop_assert!(moved <= y);
    }

    /// JSON serialisation is idempotent.
    #[test]
    fn serde_round_trip(cents in 0i64..=i64::MAX / 4) {
        let a = Amount::from_cents(cents).unwrap();
        let json = serde_json::to_string(&a).unwrap();
        let back: Amount = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, a);
        prop_assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
