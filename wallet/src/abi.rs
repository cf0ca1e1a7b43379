// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fixed on-chain surface: the batch-processor contract and the
//! ERC-20 functions the sweeps and settlements call.
//!
//! The batch processor is an external contract with a frozen ABI. Both
//! entry points revert if any per-recipient call fails or the array
//! lengths mismatch, so a revert is all-or-nothing for the bucket.

use ethers::contract::abigen;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;

abigen!(
    BatchProcessor,
    r#"[
        function processBatchNative(address[] recipients, uint256[] amounts) payable
        function processBatchErc20(address token, address[] recipients, uint256[] amounts)
    ]"#
);

abigen!(
    Erc20,
    r#"[
        function transfer(address to, uint256 amount) returns (bool)
        function approve(address spender, uint256 amount) returns (bool)
        function allowance(address owner, address spender) view returns (uint256)
        function balanceOf(address account) view returns (uint256)
        event Transfer(address indexed from, address indexed to, uint256 value)
    ]"#
);

/// `keccak256("Transfer(address,address,uint256)")`, the topic the
/// token log subscriptions filter on.
pub static TRANSFER_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("Transfer(address,address,uint256)")));

/// Decode an ERC-20 `Transfer` log into `(from, to, value)`. Returns
/// `None` for logs that are not a plain two-topic transfer.
pub fn decode_transfer_log(topics: &[H256], data: &[u8]) -> Option<(Address, Address, U256)> {
    if topics.len() != 3 || topics[0] != *TRANSFER_TOPIC || data.len() < 32 {
        return None;
    }
    let from = Address::from(topics[1]);
    let to = Address::from(topics[2]);
    let value = U256::from_big_endian(&data[..32]);
    Some((from, to, value))
}
