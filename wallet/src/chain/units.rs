// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Conversion between ledger amounts and on-chain integer units.
//!
//! This is the only place fixed-point money meets chain integers.
//! Inbound conversion truncates toward zero to the ledger's two
//! decimals; dust below one cent never reaches a balance.

use crate::error::{WalletError, WalletResult};
use ethers::types::U256;
use mind_wallet_types::amount::SCALE;
use mind_wallet_types::Amount;
use rust_decimal::Decimal;

/// Native coins use the EVM's 18 decimals.
pub const NATIVE_DECIMALS: u32 = 18;

/// Ledger amount to on-chain units for a token with `decimals`.
pub fn to_chain_units(amount: Amount, decimals: u32) -> U256 {
    let cents = U256::from(amount.cents() as u64);
    if decimals >= SCALE {
        cents * U256::from(10u64).pow(U256::from(decimals - SCALE))
    } else {
        cents / U256::from(10u64).pow(U256::from(SCALE - decimals))
    }
}

/// On-chain units to a ledger amount, truncating sub-cent dust.
/// Fails only when the value overflows the representable range.
pub fn from_chain_units(value: U256, decimals: u32) -> WalletResult<Amount> {
    let cents = if decimals >= SCALE {
        value / U256::from(10u64).pow(U256::from(decimals - SCALE))
    } else {
        value * U256::from(10u64).pow(U256::from(SCALE - decimals))
    };
    if cents > U256::from(i64::MAX as u64) {
        return Err(WalletError::Validation(format!(
            "on-chain value {} overflows the ledger range",
            value
        )));
    }
    Amount::from_cents(cents.as_u64() as i64).map_err(WalletError::from)
}

/// Full-precision decimal to on-chain units, for thresholds that may
/// carry more fractional digits than the ledger scale (min_deposit).
pub fn decimal_to_units(value: Decimal, decimals: u32) -> WalletResult<U256> {
    if value.is_sign_negative() {
        return Err(WalletError::Validation(format!(
            "negative threshold {}",
            value
        )));
    }
    let scale = value.scale();
    let mantissa = value.mantissa().unsigned_abs();
    let mantissa = U256::from_little_endian(&mantissa.to_le_bytes());
    if decimals >= scale {
        Ok(mantissa * U256::from(10u64).pow(U256::from(decimals - scale)))
    } else {
        Ok(mantissa / U256::from(10u64).pow(U256::from(scale - decimals)))
    }
}
