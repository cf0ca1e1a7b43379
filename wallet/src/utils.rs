// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{WalletError, WalletResult};
use ethers::types::{Address, H256, U256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Canonical lowercase `0x…` form used for all address keys and
/// comparisons.
pub fn normalize_address(addr: &Address) -> String {
    format!("{:#x}", addr)
}

/// Canonical lowercase `0x…` form of a transaction hash.
pub fn normalize_hash(hash: &H256) -> String {
    format!("{:#x}", hash)
}

pub fn parse_address(s: &str) -> WalletResult<Address> {
    s.parse::<Address>()
        .map_err(|e| WalletError::Validation(format!("invalid address {}: {}", s, e)))
}

pub fn parse_hash(s: &str) -> WalletResult<H256> {
    s.parse::<H256>()
        .map_err(|e| WalletError::Validation(format!("invalid transaction hash {}: {}", s, e)))
}

pub fn parse_u256_dec(s: &str) -> WalletResult<U256> {
    U256::from_dec_str(s).map_err(|e| WalletError::Serialization(format!("invalid wei value {}: {}", s, e)))
}

/// Gas limit with the flat 20% buffer applied.
pub fn with_gas_buffer(estimated: U256) -> U256 {
    estimated * U256::from(12u64) / U256::from(10u64)
}
