// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The per-chain capability set.
//!
//! The indexer and the batch processor depend on [`ChainAdapter`], not
//! on a transport. The concrete adapter owns both transport profiles
//! (push subscriptions, pull RPC) and its own reconnection; consumers
//! cannot observe which profile is delivering events.

pub mod eth;
#[cfg(test)]
pub mod mock;
pub mod units;

use crate::error::WalletResult;
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256, U256};
use std::time::Duration;
use tokio::sync::mpsc;

/// A new chain head, as delivered by the block subscription. The
/// stream may reorder by at most one slot and always resumes after a
/// reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
}

/// The slice of a transaction the deposit scanner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSummary {
    pub hash: H256,
    pub from: Address,
    /// Absent for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    /// True when the calldata is empty (a plain value transfer).
    pub input_empty: bool,
}

/// A canonical block with its full transaction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullBlock {
    pub number: u64,
    pub hash: H256,
    pub transactions: Vec<TxSummary>,
}

/// One ERC-20 `Transfer` observed through a token log subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    pub tx_hash: H256,
    pub block_number: u64,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Outcome of a bounded receipt wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Success { tx_hash: H256, block_number: u64 },
    Reverted { tx_hash: H256 },
    TimedOut { tx_hash: H256 },
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Chain name, for logs and record fields.
    fn chain(&self) -> &str;

    /// Push channel of new heads. The adapter owns reconnection and
    /// the polling fallback behind this channel.
    async fn subscribe_blocks(&self) -> WalletResult<mpsc::Receiver<BlockHeader>>;

    /// Log subscription for one token's `Transfer` topic.
    async fn subscribe_token_transfers(
        &self,
        token: Address,
    ) -> WalletResult<mpsc::Receiver<TokenTransfer>>;

    async fn get_block_with_txs(&self, number: u64) -> WalletResult<Option<FullBlock>>;

    async fn get_transaction(&self, tx_hash: H256) -> WalletResult<Option<TxSummary>>;

    async fn current_block_number(&self) -> WalletResult<u64>;

    async fn native_balance(&self, address: Address) -> WalletResult<U256>;

    async fn token_balance(&self, token: Address, address: Address) -> WalletResult<U256>;

    async fn token_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> WalletResult<U256>;

    async fn gas_price(&self) -> WalletResult<U256>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> WalletResult<U256>;

    /// Fill, sign with `signer` and submit. Returns the transaction
    /// hash.
    async fn send_signed(&self, tx: TypedTransaction, signer: &LocalWallet) -> WalletResult<H256>;

    /// Bounded wait for a receipt at the given confirmation depth.
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: u64,
        timeout: Duration,
    ) -> WalletResult<ReceiptOutcome>;
}
