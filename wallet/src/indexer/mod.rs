// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The deposit indexer.
//!
//! One indexer per chain. Block headers from the adapter are ingested
//! into the block cache; a periodic scanner admits native deposits
//! from blocks that are at least `required_confirmations` deep; token
//! deposits are admitted straight from the `Transfer` log
//! subscriptions. A per-(chain, currency) worker owns the pending
//! queue and drives each deposit through confirm, sweep and credit.
//! Truth lives in the store: the queues are rebuilt from non-terminal
//! deposit records at startup.

mod recovery;
mod worker;

use crate::chain::units::{decimal_to_units, from_chain_units, NATIVE_DECIMALS};
use crate::chain::{ChainAdapter, TokenTransfer};
use crate::config::{ChainConfig, CurrencyRules};
use crate::crypto::Cipher;
use crate::error::{WalletError, WalletResult};
use crate::ledger::Ledger;
use crate::metrics::WalletMetrics;
use crate::notify::NotificationBus;
use crate::stores::{
    AccountStore, BlockCacheStore, DepositStore, GasFundingStore, ProgressStore,
};
use crate::utils::{now_ms, parse_address, parse_u256_dec};
use ethers::signers::LocalWallet;
use ethers::types::Address;
use mind_wallet_types::{CachedBlock, CachedTransaction, Deposit, DepositStatus, WalletEvent};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use worker::RETRY_BASE;

/// The set of tracked deposit addresses, mapped to their owners.
/// Read-mostly: registration happens once per account creation, the
/// scanner reads on every transaction.
#[derive(Default)]
pub struct ActiveAddresses {
    inner: RwLock<HashMap<String, String>>,
}

impl ActiveAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-way registration; the wallet service calls this at account
    /// creation, the indexer never calls back.
    pub fn register(&self, address: &str, username: &str) {
        self.inner
            .write()
            .expect("active address lock poisoned")
            .insert(address.to_lowercase(), username.to_string());
    }

    pub fn owner_of(&self, address: &str) -> Option<String> {
        self.inner
            .read()
            .expect("active address lock poisoned")
            .get(&address.to_lowercase())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("active address lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed from persisted accounts at startup.
    pub async fn load_from(&self, accounts: &AccountStore) -> WalletResult<()> {
        for account in accounts.list().await? {
            self.register(&account.address, &account.username);
        }
        Ok(())
    }
}

/// Everything the indexer tasks share for one chain.
pub(crate) struct IndexerContext {
    pub chain: String,
    pub cfg: ChainConfig,
    pub adapter: Arc<dyn ChainAdapter>,
    pub ledger: Arc<Ledger>,
    pub deposits: DepositStore,
    pub blocks: BlockCacheStore,
    pub progress: ProgressStore,
    pub gas_funding: GasFundingStore,
    pub accounts: AccountStore,
    pub bus: Arc<NotificationBus>,
    pub active: Arc<ActiveAddresses>,
    pub cipher: Cipher,
    pub hot_wallet: LocalWallet,
    /// Lowercased hot wallet address, the sender filter.
    pub hot_address: String,
    /// Hot-wallet submissions serialise through this lane so nonces
    /// stay monotonic.
    pub submission_lane: Arc<Mutex<()>>,
    pub metrics: Arc<WalletMetrics>,
}

impl IndexerContext {
    fn rules(&self, currency: &str) -> WalletResult<CurrencyRules> {
        self.cfg.currency_rules(currency).ok_or_else(|| {
            WalletError::Configuration(format!(
                "[{}] no currency rules for {}",
                self.chain, currency
            ))
        })
    }
}

pub struct ChainIndexer {
    ctx: Arc<IndexerContext>,
    handles: Vec<JoinHandle<()>>,
}

impl ChainIndexer {
    /// Wire up and spawn the chain's task set: per-currency deposit
    /// workers, block ingest, token subscriptions, the scanner, block
    /// recovery and cache cleanup. Pending queues are rebuilt from
    /// non-terminal deposits before anything else runs.
    pub(crate) async fn start(
        ctx: IndexerContext,
        cancel: CancellationToken,
    ) -> WalletResult<Self> {
        let ctx = Arc::new(ctx);
        let mut handles = Vec::new();

        // One worker and queue per (chain, currency).
        let mut worker_txs: HashMap<String, mpsc::UnboundedSender<String>> = HashMap::new();
        for currency in ctx.cfg.currencies() {
            let rules = ctx.rules(&currency)?;
            let (tx, rx) = mpsc::unbounded_channel();
            worker_txs.insert(currency.clone(), tx);
            let worker =
                worker::DepositWorker::new(ctx.clone(), currency, rules, rx, cancel.clone());
            handles.push(tokio::spawn(worker.run()));
        }
        let worker_txs = Arc::new(worker_txs);

        // Rebuild pending queues: the in-process sets are soft caches,
        // the store is the truth.
        let mut rebuilt = 0usize;
        for deposit in ctx.deposits.list_non_terminal().await? {
            if deposit.chain != ctx.chain {
                continue;
            }
            if let Some(tx) = worker_txs.get(&deposit.currency) {
                let _ = tx.send(deposit.tx_hash.clone());
                rebuilt += 1;
            } else {
                warn!(
                    "[{}] non-terminal deposit {} references unknown currency {}",
                    ctx.chain, deposit.tx_hash, deposit.currency
                );
            }
        }
        if rebuilt > 0 {
            info!("[{}] requeued {} non-terminal deposits", ctx.chain, rebuilt);
        }

        // Block ingest.
        let block_rx = ctx.adapter.subscribe_blocks().await?;
        handles.push(tokio::spawn(run_ingest(
            ctx.clone(),
            block_rx,
            cancel.clone(),
        )));

        // Token transfer subscriptions.
        for (currency, token) in ctx.cfg.tokens.clone() {
            let token_address = parse_address(&token.address)?;
            let transfer_rx = ctx.adapter.subscribe_token_transfers(token_address).await?;
            handles.push(tokio::spawn(run_token_admission(
                ctx.clone(),
                currency,
                transfer_rx,
                worker_txs.clone(),
                cancel.clone(),
            )));
        }

        // Native deposit scanner.
        handles.push(tokio::spawn(run_scanner(
            ctx.clone(),
            worker_txs.clone(),
            cancel.clone(),
        )));

        // Missed-block recovery and cache cleanup.
        handles.push(tokio::spawn(recovery::run_block_recovery(
            ctx.clone(),
            cancel.clone(),
        )));
        handles.push(tokio::spawn(recovery::run_cache_cleanup(
            ctx.clone(),
            cancel,
        )));

        info!("[{}] indexer started", ctx.chain);
        Ok(Self { ctx, handles })
    }

    pub fn chain(&self) -> &str {
        &self.ctx.chain
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Ingest loop: every header becomes a cached full block and a
/// progress update.
async fn run_ingest(
    ctx: Arc<IndexerContext>,
    mut block_rx: mpsc::Receiver<crate::chain::BlockHeader>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            maybe_header = block_rx.recv() => match maybe_header {
                Some(header) => {
                    if let Err(e) = ingest_block(&ctx, header.number).await {
                        warn!("[{}] ingest of block {} failed: {}", ctx.chain, header.number, e);
                        ctx.metrics
                            .chain_errors
                            .with_label_values(&[&ctx.chain, e.error_type()])
                            .inc();
                    }
                }
                None => {
                    warn!("[{}] block channel closed", ctx.chain);
                    return;
                }
            }
        }
    }
}

/// Fetch and cache one block, then persist the resume point. Cached
/// blocks are never refetched.
pub(crate) async fn ingest_block(ctx: &IndexerContext, number: u64) -> WalletResult<()> {
    if ctx.blocks.has(&ctx.chain, number).await? {
        return Ok(());
    }
    let Some(block) = ctx.adapter.get_block_with_txs(number).await? else {
        return Err(WalletError::ChainRpc(format!(
            "block {} not available",
            number
        )));
    };
    let cached = CachedBlock {
        chain: ctx.chain.clone(),
        number: block.number,
        hash: format!("{:#x}", block.hash),
        transactions: block
            .transactions
            .iter()
            .map(|tx| CachedTransaction {
                hash: crate::utils::normalize_hash(&tx.hash),
                from: crate::utils::normalize_address(&tx.from),
                to: tx.to.as_ref().map(crate::utils::normalize_address),
                value_wei: tx.value.to_string(),
                input_empty: tx.input_empty,
            })
            .collect(),
        cached_at_ms: now_ms(),
        ttl_ms: ctx.cfg.block_cache_ttl_ms(),
    };
    ctx.blocks.put(&cached).await?;
    ctx.progress
        .advance_last_processed_block(&ctx.chain, number)
        .await?;
    ctx.metrics
        .last_processed_block
        .with_label_values(&[&ctx.chain])
        .set(number as i64);
    debug!(
        "[{}] cached block {} ({} txs)",
        ctx.chain,
        number,
        cached.transactions.len()
    );
    Ok(())
}

/// Periodic scanner over cached blocks that are old enough to be
/// final. Admission is idempotent: the deposit record keyed by tx hash
/// is the dedup point.
async fn run_scanner(
    ctx: Arc<IndexerContext>,
    worker_txs: Arc<HashMap<String, mpsc::UnboundedSender<String>>>,
    cancel: CancellationToken,
) {
    let mut interval = time::interval(Duration::from_millis(ctx.cfg.scan_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Blocks already examined this process lifetime. Soft cache: a
    // restart rescans and the store dedupes.
    let mut scanned: HashSet<u64> = HashSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                if let Err(e) = scan_ready_blocks(&ctx, &mut scanned, &worker_txs).await {
                    warn!("[{}] deposit scan failed: {}", ctx.chain, e);
                }
            }
        }
    }
}

async fn scan_ready_blocks(
    ctx: &IndexerContext,
    scanned: &mut HashSet<u64>,
    worker_txs: &HashMap<String, mpsc::UnboundedSender<String>>,
) -> WalletResult<()> {
    let head = ctx.adapter.current_block_number().await?;
    let Some(threshold) = head.checked_sub(ctx.cfg.required_confirmations) else {
        return Ok(());
    };

    let mut blocks = ctx.blocks.list_chain(&ctx.chain).await?;
    blocks.sort_by_key(|b| b.number);
    for block in blocks {
        if block.number > threshold || scanned.contains(&block.number) {
            continue;
        }
        for tx in &block.transactions {
            if let Err(e) = admit_native(ctx, block.number, tx, worker_txs).await {
                warn!(
                    "[{}] admission of {} failed: {}",
                    ctx.chain, tx.hash, e
                );
            }
        }
        scanned.insert(block.number);
    }
    Ok(())
}

/// Native admission rules, in filter order: tracked recipient, sender
/// is not the hot wallet, plain value transfer, not a gas top-up, not
/// already admitted, above the deposit minimum.
async fn admit_native(
    ctx: &IndexerContext,
    block_number: u64,
    tx: &CachedTransaction,
    worker_txs: &HashMap<String, mpsc::UnboundedSender<String>>,
) -> WalletResult<()> {
    let Some(to) = &tx.to else {
        return Ok(());
    };
    let Some(username) = ctx.active.owner_of(to) else {
        return Ok(());
    };
    if tx.from.eq_ignore_ascii_case(&ctx.hot_address) {
        return Ok(());
    }
    if !tx.input_empty {
        return Ok(());
    }
    if ctx.gas_funding.contains(&tx.hash).await? {
        debug!("[{}] skipping gas funding tx {}", ctx.chain, tx.hash);
        return Ok(());
    }
    if ctx.deposits.exists(&tx.hash).await? {
        return Ok(());
    }

    let value = parse_u256_dec(&tx.value_wei)?;
    let min_units = decimal_to_units(ctx.cfg.min_deposit, NATIVE_DECIMALS)?;
    if value < min_units || value.is_zero() {
        return Ok(());
    }

    let currency = ctx.cfg.native_currency.clone();
    let amount = from_chain_units(value, NATIVE_DECIMALS)?;
    let deposit = Deposit {
        tx_hash: tx.hash.clone(),
        username,
        chain: ctx.chain.clone(),
        currency: currency.clone(),
        amount,
        from_address: tx.from.clone(),
        to_address: to.clone(),
        required_confirmations: ctx.cfg.required_confirmations,
        confirmations: 0,
        status: DepositStatus::Pending,
        retries: 0,
        created_at_ms: now_ms(),
        failure: None,
    };
    enqueue_deposit(ctx, deposit, block_number, worker_txs).await
}

/// Token admission straight from the `Transfer` log subscription.
async fn run_token_admission(
    ctx: Arc<IndexerContext>,
    currency: String,
    mut transfer_rx: mpsc::Receiver<TokenTransfer>,
    worker_txs: Arc<HashMap<String, mpsc::UnboundedSender<String>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            maybe_transfer = transfer_rx.recv() => match maybe_transfer {
                Some(transfer) => {
                    if let Err(e) = admit_token(&ctx, &currency, transfer, &worker_txs).await {
                        warn!(
                            "[{}] token admission failed for {:#x}: {}",
                            ctx.chain, transfer.tx_hash, e
                        );
                    }
                }
                None => {
                    warn!("[{}] transfer channel closed for {}", ctx.chain, currency);
                    return;
                }
            }
        }
    }
}

async fn admit_token(
    ctx: &IndexerContext,
    currency: &str,
    transfer: TokenTransfer,
    worker_txs: &HashMap<String, mpsc::UnboundedSender<String>>,
) -> WalletResult<()> {
    let to = crate::utils::normalize_address(&transfer.to);
    let Some(username) = ctx.active.owner_of(&to) else {
        return Ok(());
    };
    let from = crate::utils::normalize_address(&transfer.from);
    if from.eq_ignore_ascii_case(&ctx.hot_address) {
        return Ok(());
    }
    let tx_hash = crate::utils::normalize_hash(&transfer.tx_hash);
    if ctx.deposits.exists(&tx_hash).await? {
        return Ok(());
    }

    let rules = ctx.rules(currency)?;
    let min_units = decimal_to_units(rules.min_deposit, rules.decimals)?;
    if transfer.value < min_units || transfer.value.is_zero() {
        return Ok(());
    }

    let amount = from_chain_units(transfer.value, rules.decimals)?;
    let deposit = Deposit {
        tx_hash,
        username,
        chain: ctx.chain.clone(),
        currency: currency.to_string(),
        amount,
        from_address: from,
        to_address: to,
        required_confirmations: ctx.cfg.required_confirmations,
        confirmations: 0,
        status: DepositStatus::Pending,
        retries: 0,
        created_at_ms: now_ms(),
        failure: None,
    };
    enqueue_deposit(ctx, deposit, transfer.block_number, worker_txs).await
}

async fn enqueue_deposit(
    ctx: &IndexerContext,
    deposit: Deposit,
    start_block: u64,
    worker_txs: &HashMap<String, mpsc::UnboundedSender<String>>,
) -> WalletResult<()> {
    ctx.deposits.admit(&deposit, start_block).await?;
    ctx.metrics
        .deposits_admitted
        .with_label_values(&[&ctx.chain, &deposit.currency])
        .inc();
    info!(
        "[{}] admitted {} deposit {} of {} {} for {} (block {})",
        ctx.chain,
        deposit.currency,
        deposit.tx_hash,
        deposit.amount,
        deposit.currency,
        deposit.username,
        start_block
    );
    ctx.bus
        .publish(WalletEvent::DepositUpdate {
            deposit: deposit.clone(),
        })
        .await;
    if let Some(tx) = worker_txs.get(&deposit.currency) {
        let _ = tx.send(deposit.tx_hash);
    }
    Ok(())
}

/// Address the hot wallet signs as, parsed once per use site.
pub(crate) fn hot_wallet_address(ctx: &IndexerContext) -> WalletResult<Address> {
    parse_address(&ctx.hot_address)
}
