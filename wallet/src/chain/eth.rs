// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ethers-backed chain adapter.
//!
//! Two transport profiles coexist: a persistent websocket for the
//! block and log subscriptions (push) and HTTP for every explicit RPC
//! including signed submissions (pull). The adapter owns reconnection:
//! 3 s initial backoff, doubling, five attempts; after that the
//! subscription silently degrades to a polling loop over the pull
//! profile, and consumers keep reading the same channel.

use crate::abi::{self, AllowanceCall, BalanceOfCall};
use crate::chain::{
    BlockHeader, ChainAdapter, FullBlock, ReceiptOutcome, TokenTransfer, TxSummary,
};
use crate::error::{WalletError, WalletResult};
use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::providers::{Http, Middleware, Provider, Ws};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Filter, Transaction, H256, U256};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// First reconnect delay; doubles per attempt.
const RECONNECT_INITIAL: Duration = Duration::from_secs(3);
/// Reconnect attempts before the polling fallback engages.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Cadence of receipt polling inside a bounded wait.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const SUBSCRIPTION_CHANNEL_SIZE: usize = 1024;

pub struct EthChainAdapter {
    chain: String,
    ws_url: String,
    http: Provider<Http>,
    chain_id: u64,
    /// Cadence of the polling fallback.
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl EthChainAdapter {
    /// Connect the pull profile and verify the chain id against
    /// configuration. A mismatch is a fatal configuration error.
    pub async fn connect(
        chain: impl Into<String>,
        ws_url: impl Into<String>,
        http_rpc_url: &str,
        chain_id: u64,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> WalletResult<Self> {
        let chain = chain.into();
        let http = Provider::<Http>::try_from(http_rpc_url).map_err(|e| {
            WalletError::Configuration(format!("invalid http rpc url {}: {}", http_rpc_url, e))
        })?;
        let adapter = Self {
            chain,
            ws_url: ws_url.into(),
            http,
            chain_id,
            poll_interval,
            cancel,
        };
        verify_chain_id(&adapter.http, &adapter.chain, adapter.chain_id).await?;
        let head = adapter.current_block_number().await?;
        info!(
            "[{}] connected (chain_id={} verified), current block {}",
            adapter.chain, adapter.chain_id, head
        );
        Ok(adapter)
    }

    fn rpc_err(&self, context: &str, e: impl std::fmt::Display) -> WalletError {
        WalletError::ChainRpc(format!("[{}] {}: {}", self.chain, context, e))
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> WalletResult<Vec<u8>> {
        let mut tx = TypedTransaction::default();
        tx.set_to(to);
        tx.set_data(data.into());
        let out = self
            .http
            .call(&tx, None)
            .await
            .map_err(|e| self.rpc_err("eth_call", e))?;
        Ok(out.to_vec())
    }
}

async fn verify_chain_id(
    http: &Provider<Http>,
    chain: &str,
    expected: u64,
) -> WalletResult<()> {
    let actual = http
        .get_chainid()
        .await
        .map_err(|e| WalletError::ChainRpc(format!("[{}] eth_chainId: {}", chain, e)))?
        .as_u64();
    if actual != expected {
        return Err(WalletError::Configuration(format!(
            "[{}] chain id mismatch: expected {}, node reports {} - refusing to run against the wrong network",
            chain, expected, actual
        )));
    }
    Ok(())
}

fn tx_summary(tx: &Transaction) -> TxSummary {
    TxSummary {
        hash: tx.hash,
        from: tx.from,
        to: tx.to,
        value: tx.value,
        input_empty: tx.input.as_ref().is_empty(),
    }
}

fn decode_uint_return(bytes: &[u8]) -> WalletResult<U256> {
    if bytes.len() < 32 {
        return Err(WalletError::ChainRpc(format!(
            "short uint256 return: {} bytes",
            bytes.len()
        )));
    }
    Ok(U256::from_big_endian(&bytes[..32]))
}

#[async_trait]
impl ChainAdapter for EthChainAdapter {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn subscribe_blocks(&self) -> WalletResult<mpsc::Receiver<BlockHeader>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_SIZE);
        tokio::spawn(run_block_subscription(
            self.chain.clone(),
            self.ws_url.clone(),
            self.http.clone(),
            self.chain_id,
            self.poll_interval,
            tx,
            self.cancel.clone(),
        ));
        Ok(rx)
    }

    async fn subscribe_token_transfers(
        &self,
        token: Address,
    ) -> WalletResult<mpsc::Receiver<TokenTransfer>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_SIZE);
        tokio::spawn(run_transfer_subscription(
            self.chain.clone(),
            self.ws_url.clone(),
            self.http.clone(),
            self.chain_id,
            token,
            self.poll_interval,
            tx,
            self.cancel.clone(),
        ));
        Ok(rx)
    }

    async fn get_block_with_txs(&self, number: u64) -> WalletResult<Option<FullBlock>> {
        let block = self
            .http
            .get_block_with_txs(number)
            .await
            .map_err(|e| self.rpc_err("eth_getBlockByNumber", e))?;
        Ok(block.and_then(|b| {
            let block_number = b.number?.as_u64();
            Some(FullBlock {
                number: block_number,
                hash: b.hash.unwrap_or_default(),
                transactions: b.transactions.iter().map(tx_summary).collect(),
            })
        }))
    }

    async fn get_transaction(&self, tx_hash: H256) -> WalletResult<Option<TxSummary>> {
        let tx = self
            .http
            .get_transaction(tx_hash)
            .await
            .map_err(|e| self.rpc_err("eth_getTransactionByHash", e))?;
        Ok(tx.as_ref().map(tx_summary))
    }

    async fn current_block_number(&self) -> WalletResult<u64> {
        Ok(self
            .http
            .get_block_number()
            .await
            .map_err(|e| self.rpc_err("eth_blockNumber", e))?
            .as_u64())
    }

    async fn native_balance(&self, address: Address) -> WalletResult<U256> {
        self.http
            .get_balance(address, None)
            .await
            .map_err(|e| self.rpc_err("eth_getBalance", e))
    }

    async fn token_balance(&self, token: Address, address: Address) -> WalletResult<U256> {
        let out = self
            .eth_call(token, BalanceOfCall { account: address }.encode())
            .await?;
        decode_uint_return(&out)
    }

    async fn token_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> WalletResult<U256> {
        let out = self
            .eth_call(token, AllowanceCall { owner, spender }.encode())
            .await?;
        decode_uint_return(&out)
    }

    async fn gas_price(&self) -> WalletResult<U256> {
        self.http
            .get_gas_price()
            .await
            .map_err(|e| self.rpc_err("eth_gasPrice", e))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> WalletResult<U256> {
        self.http
            .estimate_gas(tx, None)
            .await
            .map_err(|e| self.rpc_err("eth_estimateGas", e))
    }

    async fn send_signed(&self, tx: TypedTransaction, signer: &LocalWallet) -> WalletResult<H256> {
        let mut tx = tx;
        let signer = signer.clone().with_chain_id(self.chain_id);
        let from = signer.address();
        tx.set_from(from);
        tx.set_chain_id(self.chain_id);

        let nonce = self
            .http
            .get_transaction_count(from, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.rpc_err("eth_getTransactionCount", e))?;
        tx.set_nonce(nonce);

        if tx.gas_price().is_none() {
            let gas_price = self.gas_price().await?;
            tx.set_gas_price(gas_price);
        }
        if tx.gas().is_none() {
            let estimated = self.estimate_gas(&tx).await?;
            tx.set_gas(estimated);
        }

        let signature = signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| WalletError::Crypto(format!("signing failed: {}", e)))?;
        let raw = tx.rlp_signed(&signature);
        let pending = self
            .http
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.rpc_err("eth_sendRawTransaction", e))?;
        let tx_hash = pending.tx_hash();
        debug!("[{}] submitted {:#x} (nonce {})", self.chain, tx_hash, nonce);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: u64,
        timeout: Duration,
    ) -> WalletResult<ReceiptOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let receipt = self
                .http
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| self.rpc_err("eth_getTransactionReceipt", e))?;

            if let Some(receipt) = receipt {
                if receipt.status == Some(0u64.into()) {
                    return Ok(ReceiptOutcome::Reverted { tx_hash });
                }
                let block_number = receipt
                    .block_number
                    .map(|n| n.as_u64())
                    .ok_or_else(|| self.rpc_err("receipt", "missing block number"))?;
                if confirmations <= 1 {
                    return Ok(ReceiptOutcome::Success {
                        tx_hash,
                        block_number,
                    });
                }
                let head = self.current_block_number().await?;
                if head + 1 >= block_number + confirmations {
                    return Ok(ReceiptOutcome::Success {
                        tx_hash,
                        block_number,
                    });
                }
            }

            if Instant::now() >= deadline {
                return Ok(ReceiptOutcome::TimedOut { tx_hash });
            }
            time::sleep(RECEIPT_POLL_INTERVAL.min(timeout)).await;
        }
    }
}

/// Push loop for block headers, with the reconnect/fallback policy.
async fn run_block_subscription(
    chain: String,
    ws_url: String,
    http: Provider<Http>,
    chain_id: u64,
    poll_interval: Duration,
    tx: mpsc::Sender<BlockHeader>,
    cancel: CancellationToken,
) {
    let mut attempts = 0u32;
    let mut delay = RECONNECT_INITIAL;

    while attempts < MAX_RECONNECT_ATTEMPTS {
        if cancel.is_cancelled() {
            return;
        }
        match Provider::<Ws>::connect(&ws_url).await {
            Ok(ws) => {
                // Re-verify the chain id on every reconnect; a mismatch
                // means the endpoint changed under us.
                match ws.get_chainid().await {
                    Ok(actual) if actual.as_u64() == chain_id => {}
                    Ok(actual) => {
                        error!(
                            "[{}] chain id changed on reconnect: expected {}, got {} - shutting down",
                            chain, chain_id, actual
                        );
                        cancel.cancel();
                        return;
                    }
                    Err(e) => {
                        warn!("[{}] chain id check failed after reconnect: {}", chain, e);
                    }
                }

                match ws.subscribe_blocks().await {
                    Ok(mut stream) => {
                        info!("[{}] block subscription established", chain);
                        attempts = 0;
                        delay = RECONNECT_INITIAL;
                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                maybe_block = stream.next() => match maybe_block {
                                    Some(block) => {
                                        if let Some(number) = block.number {
                                            if tx.send(BlockHeader { number: number.as_u64() }).await.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                    None => {
                                        warn!("[{}] block subscription dropped", chain);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => warn!("[{}] block subscribe failed: {}", chain, e),
                }
            }
            Err(e) => warn!("[{}] websocket connect failed: {}", chain, e),
        }

        attempts += 1;
        if attempts < MAX_RECONNECT_ATTEMPTS {
            debug!(
                "[{}] reconnecting block subscription in {:?} (attempt {})",
                chain, delay, attempts
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(delay) => {}
            }
            delay *= 2;
        }
    }

    warn!(
        "[{}] push transport unavailable after {} attempts, engaging polling fallback",
        chain, MAX_RECONNECT_ATTEMPTS
    );
    poll_block_headers(chain, http, poll_interval, tx, cancel).await;
}

/// Polling fallback: synthesise the header stream from the pull
/// profile so downstream consumers never notice the transport change.
async fn poll_block_headers(
    chain: String,
    http: Provider<Http>,
    poll_interval: Duration,
    tx: mpsc::Sender<BlockHeader>,
    cancel: CancellationToken,
) {
    let mut last: Option<u64> = None;
    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                match http.get_block_number().await {
                    Ok(head) => {
                        let head = head.as_u64();
                        let start = match last {
                            Some(l) if head > l => l + 1,
                            Some(_) => continue,
                            None => head,
                        };
                        for number in start..=head {
                            if tx.send(BlockHeader { number }).await.is_err() {
                                return;
                            }
                        }
                        last = Some(head);
                    }
                    Err(e) => warn!("[{}] polling eth_blockNumber failed: {}", chain, e),
                }
            }
        }
    }
}

/// Push loop for one token's `Transfer` logs, same policy as blocks.
#[allow(clippy::too_many_arguments)]
async fn run_transfer_subscription(
    chain: String,
    ws_url: String,
    http: Provider<Http>,
    chain_id: u64,
    token: Address,
    poll_interval: Duration,
    tx: mpsc::Sender<TokenTransfer>,
    cancel: CancellationToken,
) {
    let filter = Filter::new().address(token).topic0(*abi::TRANSFER_TOPIC);
    let mut attempts = 0u32;
    let mut delay = RECONNECT_INITIAL;

    while attempts < MAX_RECONNECT_ATTEMPTS {
        if cancel.is_cancelled() {
            return;
        }
        match Provider::<Ws>::connect(&ws_url).await {
            Ok(ws) => {
                match ws.get_chainid().await {
                    Ok(actual) if actual.as_u64() == chain_id => {}
                    Ok(actual) => {
                        error!(
                            "[{}] chain id changed on reconnect: expected {}, got {} - shutting down",
                            chain, chain_id, actual
                        );
                        cancel.cancel();
                        return;
                    }
                    Err(e) => warn!("[{}] chain id check failed after reconnect: {}", chain, e),
                }

                match ws.subscribe_logs(&filter).await {
                    Ok(mut stream) => {
                        info!("[{}] transfer subscription established for {:#x}", chain, token);
                        attempts = 0;
                        delay = RECONNECT_INITIAL;
                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                maybe_log = stream.next() => match maybe_log {
                                    Some(log) => {
                                        if let Some(transfer) = transfer_from_log(token, &log) {
                                            if tx.send(transfer).await.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                    None => {
                                        warn!("[{}] transfer subscription dropped for {:#x}", chain, token);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => warn!("[{}] log subscribe failed for {:#x}: {}", chain, token, e),
                }
            }
            Err(e) => warn!("[{}] websocket connect failed: {}", chain, e),
        }

        attempts += 1;
        if attempts < MAX_RECONNECT_ATTEMPTS {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(delay) => {}
            }
            delay *= 2;
        }
    }

    warn!(
        "[{}] push transport unavailable for {:#x}, engaging log polling fallback",
        chain, token
    );
    poll_transfer_logs(chain, http, token, filter, poll_interval, tx, cancel).await;
}

async fn poll_transfer_logs(
    chain: String,
    http: Provider<Http>,
    token: Address,
    filter: Filter,
    poll_interval: Duration,
    tx: mpsc::Sender<TokenTransfer>,
    cancel: CancellationToken,
) {
    let mut last: Option<u64> = None;
    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                let head = match http.get_block_number().await {
                    Ok(n) => n.as_u64(),
                    Err(e) => {
                        warn!("[{}] polling eth_blockNumber failed: {}", chain, e);
                        continue;
                    }
                };
                let start = match last {
                    Some(l) if head > l => l + 1,
                    Some(_) => continue,
                    None => head,
                };
                let ranged = filter.clone().from_block(start).to_block(head);
                match http.get_logs(&ranged).await {
                    Ok(logs) => {
                        for log in logs {
                            if let Some(transfer) = transfer_from_log(token, &log) {
                                if tx.send(transfer).await.is_err() {
                                    return;
                                }
                            }
                        }
                        last = Some(head);
                    }
                    Err(e) => warn!("[{}] polling eth_getLogs failed for {:#x}: {}", chain, token, e),
                }
            }
        }
    }
}

fn transfer_from_log(token: Address, log: &ethers::types::Log) -> Option<TokenTransfer> {
    let (from, to, value) = abi::decode_transfer_log(&log.topics, &log.data)?;
    Some(TokenTransfer {
        tx_hash: log.transaction_hash?,
        block_number: log.block_number?.as_u64(),
        token,
        from,
        to,
        value,
    })
}
