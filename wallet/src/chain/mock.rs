// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scripted chain adapter for tests.
//!
//! Tests drive the chain by hand: add blocks, push headers and
//! transfer logs, set balances, and choose receipt outcomes. Submitted
//! transactions are recorded instead of going anywhere.

use crate::chain::{
    BlockHeader, ChainAdapter, FullBlock, ReceiptOutcome, TokenTransfer, TxSummary,
};
use crate::error::{WalletError, WalletResult};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// A transaction captured by `send_signed`.
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub hash: H256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas: Option<U256>,
}

#[derive(Default)]
pub struct MockChainAdapter {
    chain: String,
    head: AtomicU64,
    next_hash: AtomicU64,
    block_fetches: AtomicU64,
    blocks: Mutex<HashMap<u64, FullBlock>>,
    txs: Mutex<HashMap<H256, TxSummary>>,
    native_balances: Mutex<HashMap<Address, U256>>,
    token_balances: Mutex<HashMap<(Address, Address), U256>>,
    allowances: Mutex<HashMap<(Address, Address, Address), U256>>,
    gas_price: Mutex<U256>,
    gas_estimate: Mutex<U256>,
    submitted: Mutex<Vec<SubmittedTx>>,
    receipt_outcomes: Mutex<HashMap<H256, ReceiptOutcome>>,
    send_failures: Mutex<VecDeque<WalletError>>,
    block_subscribers: Mutex<Vec<mpsc::Sender<BlockHeader>>>,
    transfer_subscribers: Mutex<Vec<(Address, mpsc::Sender<TokenTransfer>)>>,
}

impl MockChainAdapter {
    pub fn new(chain: &str) -> Self {
        Self {
            chain: chain.to_string(),
            gas_price: Mutex::new(U256::from(1_000_000_000u64)), // 1 gwei
            gas_estimate: Mutex::new(U256::from(50_000u64)),
            ..Default::default()
        }
    }

    pub fn set_head(&self, number: u64) {
        self.head.store(number, Ordering::SeqCst);
    }

    /// Register a block and its transactions, advancing the head if
    /// the block is beyond it.
    pub fn add_block(&self, block: FullBlock) {
        let mut txs = self.txs.lock().unwrap();
        for tx in &block.transactions {
            txs.insert(tx.hash, tx.clone());
        }
        drop(txs);
        if block.number > self.head.load(Ordering::SeqCst) {
            self.set_head(block.number);
        }
        self.blocks.lock().unwrap().insert(block.number, block);
    }

    /// Deliver a header to every block subscriber.
    pub async fn push_header(&self, number: u64) {
        if number > self.head.load(Ordering::SeqCst) {
            self.set_head(number);
        }
        let senders: Vec<_> = self.block_subscribers.lock().unwrap().clone();
        for tx in senders {
            let _ = tx.send(BlockHeader { number }).await;
        }
    }

    /// Deliver a transfer log to the matching token subscribers.
    pub async fn push_transfer(&self, transfer: TokenTransfer) {
        let senders: Vec<_> = self
            .transfer_subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(token, _)| *token == transfer.token)
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(transfer).await;
        }
    }

    pub fn set_gas_price(&self, price: U256) {
        *self.gas_price.lock().unwrap() = price;
    }

    pub fn set_gas_estimate(&self, estimate: U256) {
        *self.gas_estimate.lock().unwrap() = estimate;
    }

    pub fn set_native_balance(&self, address: Address, balance: U256) {
        self.native_balances.lock().unwrap().insert(address, balance);
    }

    pub fn set_token_balance(&self, token: Address, address: Address, balance: U256) {
        self.token_balances
            .lock()
            .unwrap()
            .insert((token, address), balance);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, value: U256) {
        self.allowances
            .lock()
            .unwrap()
            .insert((token, owner, spender), value);
    }

    pub fn set_receipt_outcome(&self, tx_hash: H256, outcome: ReceiptOutcome) {
        self.receipt_outcomes.lock().unwrap().insert(tx_hash, outcome);
    }

    /// Queue an error for the next `send_signed` call.
    pub fn fail_next_send(&self, error: WalletError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn last_submitted(&self) -> Option<SubmittedTx> {
        self.submitted.lock().unwrap().last().cloned()
    }

    /// How many times `get_block_with_txs` was called.
    pub fn block_fetches(&self) -> u64 {
        self.block_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn subscribe_blocks(&self) -> WalletResult<mpsc::Receiver<BlockHeader>> {
        let (tx, rx) = mpsc::channel(1024);
        self.block_subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn subscribe_token_transfers(
        &self,
        token: Address,
    ) -> WalletResult<mpsc::Receiver<TokenTransfer>> {
        let (tx, rx) = mpsc::channel(1024);
        self.transfer_subscribers.lock().unwrap().push((token, tx));
        Ok(rx)
    }

    async fn get_block_with_txs(&self, number: u64) -> WalletResult<Option<FullBlock>> {
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.blocks.lock().unwrap().get(&number).cloned())
    }

    async fn get_transaction(&self, tx_hash: H256) -> WalletResult<Option<TxSummary>> {
        Ok(self.txs.lock().unwrap().get(&tx_hash).cloned())
    }

    async fn current_block_number(&self) -> WalletResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn native_balance(&self, address: Address) -> WalletResult<U256> {
        Ok(self
            .native_balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn token_balance(&self, token: Address, address: Address) -> WalletResult<U256> {
        Ok(self
            .token_balances
            .lock()
            .unwrap()
            .get(&(token, address))
            .copied()
            .unwrap_or_default())
    }

    async fn token_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> WalletResult<U256> {
        Ok(self
            .allowances
            .lock()
            .unwrap()
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn gas_price(&self) -> WalletResult<U256> {
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> WalletResult<U256> {
        Ok(*self.gas_estimate.lock().unwrap())
    }

    async fn send_signed(&self, tx: TypedTransaction, signer: &LocalWallet) -> WalletResult<H256> {
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
        let hash = H256::from_low_u64_be(0x5eed_0000_0000 + n);
        let to = tx.to().and_then(|t| match t {
            ethers::types::NameOrAddress::Address(a) => Some(*a),
            _ => None,
        });
        self.submitted.lock().unwrap().push(SubmittedTx {
            hash,
            from: signer.address(),
            to,
            value: tx.value().copied().unwrap_or_default(),
            data: tx.data().map(|d| d.to_vec()).unwrap_or_default(),
            gas: tx.gas().copied(),
        });
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        _confirmations: u64,
        _timeout: Duration,
    ) -> WalletResult<ReceiptOutcome> {
        Ok(self
            .receipt_outcomes
            .lock()
            .unwrap()
            .get(&tx_hash)
            .copied()
            .unwrap_or(ReceiptOutcome::Success {
                tx_hash,
                block_number: self.head.load(Ordering::SeqCst),
            }))
    }
}
