// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-(chain, currency) deposit worker.
//!
//! Owns the pending queue: state transitions for a given deposit are
//! totally ordered because only this task touches it. Confirmation
//! counting, the sweep to the hot wallet and the ledger credit all
//! happen here; the credit and the `confirmed → credited` flip commit
//! in one store batch, so a crash in between leaves the deposit
//! `confirmed` and retryable with no double credit.

use super::{hot_wallet_address, IndexerContext};
use crate::chain::units::{from_chain_units, to_chain_units, NATIVE_DECIMALS};
use crate::chain::ReceiptOutcome;
use crate::config::CurrencyRules;
use crate::crypto::wallet_from_key_bytes;
use crate::error::{WalletError, WalletResult};
use crate::utils::{normalize_hash, parse_address, parse_hash, with_gas_buffer};
use ethers::abi::AbiEncode;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{TransactionRequest, U256};
use mind_wallet_types::{Deposit, DepositStatus, WalletEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Base of the linear retry backoff: `3s × retries`.
pub const RETRY_BASE: Duration = Duration::from_secs(3);
/// Bounded receipt wait per sweep attempt.
const SWEEP_RECEIPT_TIMEOUT: Duration = Duration::from_secs(15);
/// Gas limit of a plain native transfer.
const NATIVE_TRANSFER_GAS: u64 = 21_000;

enum Step {
    /// Deposit left the queue (terminal).
    Finished,
    /// Still pending; look again next pass.
    InProgress,
}

pub(crate) struct DepositWorker {
    ctx: Arc<IndexerContext>,
    currency: String,
    rules: CurrencyRules,
    rx: mpsc::UnboundedReceiver<String>,
    pending: Vec<String>,
    /// Per-deposit earliest next attempt, from the retry backoff.
    next_attempt: HashMap<String, Instant>,
    /// Gas top-up hash per deposit, to clean the funding filter on
    /// terminal transitions. Survives only this process; stale filter
    /// entries are harmless because the sender filter also rejects
    /// hot-wallet transactions.
    funding_by_deposit: HashMap<String, String>,
    cancel: CancellationToken,
}

impl DepositWorker {
    pub fn new(
        ctx: Arc<IndexerContext>,
        currency: String,
        rules: CurrencyRules,
        rx: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            currency,
            rules,
            rx,
            pending: Vec::new(),
            next_attempt: HashMap::new(),
            funding_by_deposit: HashMap::new(),
            cancel,
        }
    }

    pub async fn run(mut self) {
        let mut interval =
            time::interval(Duration::from_millis(self.ctx.cfg.confirm_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "[{}] deposit worker started for {}",
            self.ctx.chain, self.currency
        );

        // The queue receiver and cancel token move into locals so the
        // select arms do not hold borrows of `self` across handlers.
        let (_detached, placeholder) = mpsc::unbounded_channel();
        let mut rx = std::mem::replace(&mut self.rx, placeholder);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                maybe_hash = rx.recv() => match maybe_hash {
                    Some(hash) => self.enqueue(hash),
                    None => return,
                },
                _ = interval.tick() => self.pass().await,
            }
        }
    }

    pub(crate) fn enqueue(&mut self, hash: String) {
        if !self.pending.contains(&hash) {
            self.pending.push(hash);
            self.publish_queue_depth();
        }
    }

    /// Pull queued hashes without blocking. The run loop does this
    /// through `select!`; tests drive it directly.
    #[cfg(test)]
    pub(crate) fn drain_queue(&mut self) {
        while let Ok(hash) = self.rx.try_recv() {
            self.enqueue(hash);
        }
    }

    fn publish_queue_depth(&self) {
        self.ctx
            .metrics
            .pending_deposits
            .with_label_values(&[&self.ctx.chain, &self.currency])
            .set(self.pending.len() as i64);
    }

    pub(crate) async fn pass(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let head = match self.ctx.adapter.current_block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!(
                    "[{}] head unavailable, skipping confirmation pass: {}",
                    self.ctx.chain, e
                );
                return;
            }
        };

        let now = Instant::now();
        for hash in self.pending.clone() {
            if self
                .next_attempt
                .get(&hash)
                .is_some_and(|at| *at > now)
            {
                continue;
            }
            match self.process_one(&hash, head).await {
                Ok(Step::Finished) => self.remove(&hash),
                Ok(Step::InProgress) => {}
                Err(e) => self.handle_error(&hash, e).await,
            }
        }
    }

    fn remove(&mut self, hash: &str) {
        self.pending.retain(|h| h != hash);
        self.next_attempt.remove(hash);
        self.funding_by_deposit.remove(hash);
        self.publish_queue_depth();
    }

    /// Advance one deposit as far as it can go this pass.
    async fn process_one(&mut self, hash: &str, head: u64) -> WalletResult<Step> {
        let Some(mut deposit) = self.ctx.deposits.get(hash).await? else {
            warn!("[{}] queued deposit {} has no record", self.ctx.chain, hash);
            return Ok(Step::Finished);
        };
        if deposit.status.is_terminal() {
            return Ok(Step::Finished);
        }

        let start_block = self.ctx.deposits.start_block(hash).await?.ok_or_else(|| {
            WalletError::Internal(format!("deposit {} lost its start block", hash))
        })?;
        let confirmations = head.saturating_sub(start_block).saturating_add(1);

        if confirmations < deposit.required_confirmations {
            let observed = confirmations.min(deposit.required_confirmations);
            if deposit.status != DepositStatus::Confirming
                || deposit.confirmations != observed
            {
                deposit.status = DepositStatus::Confirming;
                deposit.confirmations = observed;
                self.ctx.deposits.update(&deposit).await?;
                self.publish(&deposit).await;
            }
            return Ok(Step::InProgress);
        }

        if deposit.status != DepositStatus::Confirmed {
            deposit.status = DepositStatus::Confirmed;
            deposit.confirmations = deposit.required_confirmations;
            self.ctx.deposits.update(&deposit).await?;
            self.publish(&deposit).await;
        }

        // Sweep, then credit-once.
        let credited = if self.rules.token_address.is_none() {
            self.sweep_native(&deposit).await?
        } else {
            self.sweep_token(&deposit).await?
        };

        deposit.status = DepositStatus::Credited;
        let funding = self.funding_by_deposit.get(hash).cloned();
        let cleanup = self.ctx.deposits.terminal_ops(&deposit, funding.as_deref())?;
        self.ctx
            .ledger
            .credit_with(
                &deposit.username,
                &deposit.chain,
                &deposit.currency,
                credited,
                cleanup,
            )
            .await?;

        self.ctx
            .metrics
            .deposits_credited
            .with_label_values(&[&self.ctx.chain, &self.currency])
            .inc();
        info!(
            "[{}] credited deposit {}: {} {} to {}",
            self.ctx.chain, deposit.tx_hash, credited, deposit.currency, deposit.username
        );
        self.publish(&deposit).await;
        Ok(Step::Finished)
    }

    /// Native sweep: the user's key sends `value − gas` to the hot
    /// wallet. Returns the amount that actually reached custody.
    async fn sweep_native(&self, deposit: &Deposit) -> WalletResult<mind_wallet_types::Amount> {
        let tx_hash = parse_hash(&deposit.tx_hash)?;
        let origin = self
            .ctx
            .adapter
            .get_transaction(tx_hash)
            .await?
            .ok_or_else(|| {
                WalletError::ChainRpc(format!("deposit tx {} not found", deposit.tx_hash))
            })?;

        let gas_price = self.ctx.adapter.gas_price().await?;
        let gas_cost = gas_price * U256::from(NATIVE_TRANSFER_GAS);
        if origin.value <= gas_cost {
            return Err(WalletError::InsufficientAfterGas);
        }
        let sweep_value = origin.value - gas_cost;

        let user_address = parse_address(&deposit.to_address)?;
        let balance = self.ctx.adapter.native_balance(user_address).await?;
        if balance < origin.value {
            return Err(WalletError::InsufficientBalance);
        }

        let signer = self.user_wallet(&deposit.username).await?;
        let tx: TypedTransaction = TransactionRequest::new()
            .to(hot_wallet_address(&self.ctx)?)
            .value(sweep_value)
            .gas(NATIVE_TRANSFER_GAS)
            .gas_price(gas_price)
            .into();
        let sweep_hash = self.ctx.adapter.send_signed(tx, &signer).await?;
        self.await_sweep_receipt(sweep_hash).await?;

        from_chain_units(sweep_value, NATIVE_DECIMALS)
    }

    /// Token sweep: top up gas from the hot wallet if the deposit
    /// address cannot pay for the transfer, then move the tokens with
    /// the user's key.
    async fn sweep_token(&mut self, deposit: &Deposit) -> WalletResult<mind_wallet_types::Amount> {
        let token = parse_address(
            self.rules
                .token_address
                .as_deref()
                .expect("token sweep requires a token currency"),
        )?;
        let user_address = parse_address(&deposit.to_address)?;
        let units = to_chain_units(deposit.amount, self.rules.decimals);

        let token_balance = self.ctx.adapter.token_balance(token, user_address).await?;
        if token_balance < units {
            return Err(WalletError::InsufficientBalance);
        }

        let gas_price = self.ctx.adapter.gas_price().await?;
        let gas_needed = gas_price * U256::from(self.ctx.cfg.gas_limit_erc20);
        let native_balance = self.ctx.adapter.native_balance(user_address).await?;
        if native_balance < gas_needed {
            self.fund_gas(deposit, user_address, gas_needed, gas_price)
                .await?;
        }

        let data = crate::abi::TransferCall {
            to: hot_wallet_address(&self.ctx)?,
            amount: units,
        }
        .encode();
        let mut tx: TypedTransaction = TransactionRequest::new()
            .to(token)
            .data(data)
            .gas_price(gas_price)
            .into();
        tx.set_from(user_address);
        let estimated = self.ctx.adapter.estimate_gas(&tx).await?;
        tx.set_gas(with_gas_buffer(estimated));

        let signer = self.user_wallet(&deposit.username).await?;
        let sweep_hash = self.ctx.adapter.send_signed(tx, &signer).await?;
        self.await_sweep_receipt(sweep_hash).await?;
        Ok(deposit.amount)
    }

    /// Hot-wallet gas top-up, tagged in the persisted funding filter
    /// before anything waits on it.
    async fn fund_gas(
        &mut self,
        deposit: &Deposit,
        user_address: ethers::types::Address,
        amount: U256,
        gas_price: U256,
    ) -> WalletResult<()> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(user_address)
            .value(amount)
            .gas(NATIVE_TRANSFER_GAS)
            .gas_price(gas_price)
            .into();

        let funding_hash = {
            let _lane = self.ctx.submission_lane.lock().await;
            self.ctx.adapter.send_signed(tx, &self.ctx.hot_wallet).await?
        };
        let funding_hash = normalize_hash(&funding_hash);
        self.ctx
            .gas_funding
            .tag(&funding_hash, &deposit.tx_hash)
            .await?;
        self.funding_by_deposit
            .insert(deposit.tx_hash.clone(), funding_hash.clone());
        debug!(
            "[{}] funded sweep gas for {} via {}",
            self.ctx.chain, deposit.tx_hash, funding_hash
        );

        match self
            .ctx
            .adapter
            .wait_for_receipt(parse_hash(&funding_hash)?, 1, SWEEP_RECEIPT_TIMEOUT)
            .await?
        {
            ReceiptOutcome::Success { .. } => Ok(()),
            ReceiptOutcome::Reverted { .. } => Err(WalletError::ChainReverted(funding_hash)),
            ReceiptOutcome::TimedOut { .. } => Err(WalletError::ReceiptTimeout(funding_hash)),
        }
    }

    async fn await_sweep_receipt(&self, tx_hash: ethers::types::H256) -> WalletResult<()> {
        match self
            .ctx
            .adapter
            .wait_for_receipt(tx_hash, 1, SWEEP_RECEIPT_TIMEOUT)
            .await?
        {
            ReceiptOutcome::Success { .. } => Ok(()),
            ReceiptOutcome::Reverted { tx_hash } => {
                Err(WalletError::ChainReverted(normalize_hash(&tx_hash)))
            }
            ReceiptOutcome::TimedOut { tx_hash } => {
                Err(WalletError::ReceiptTimeout(normalize_hash(&tx_hash)))
            }
        }
    }

    async fn user_wallet(&self, username: &str) -> WalletResult<LocalWallet> {
        let account = self
            .ctx
            .accounts
            .get(username)
            .await?
            .ok_or_else(|| WalletError::Internal(format!("account {} missing", username)))?;
        let key_bytes = self.ctx.cipher.decrypt(&account.encrypted_key)?;
        wallet_from_key_bytes(&key_bytes)
    }

    /// Retry policy: `INSUFFICIENT_*` fails immediately, anything else
    /// is transient until the retry budget runs out.
    async fn handle_error(&mut self, hash: &str, error: WalletError) {
        let deposit = match self.ctx.deposits.get(hash).await {
            Ok(Some(d)) => d,
            _ => {
                self.remove(hash);
                return;
            }
        };

        let retries = deposit.retries + 1;
        let exhausted = retries > self.ctx.cfg.max_retries;
        if error.is_terminal_for_deposit() || exhausted {
            let reason = error.error_type();
            warn!(
                "[{}] deposit {} failed terminally after {} attempts: {}",
                self.ctx.chain, hash, retries, error
            );
            let funding = self.funding_by_deposit.get(hash).cloned();
            match self
                .ctx
                .deposits
                .fail(hash, reason, funding.as_deref())
                .await
            {
                Ok(failed) => {
                    self.ctx
                        .metrics
                        .deposits_failed
                        .with_label_values(&[&self.ctx.chain, &self.currency, reason])
                        .inc();
                    self.publish(&failed).await;
                }
                Err(e) => warn!(
                    "[{}] could not mark deposit {} failed: {}",
                    self.ctx.chain, hash, e
                ),
            }
            self.remove(hash);
            return;
        }

        debug!(
            "[{}] deposit {} attempt {} failed, retrying: {}",
            self.ctx.chain, hash, retries, error
        );
        let mut updated = deposit;
        updated.retries = retries;
        if let Err(e) = self.ctx.deposits.update(&updated).await {
            warn!(
                "[{}] could not persist retry counter for {}: {}",
                self.ctx.chain, hash, e
            );
        }
        self.next_attempt.insert(
            hash.to_string(),
            Instant::now() + RETRY_BASE * retries,
        );
    }

    async fn publish(&self, deposit: &Deposit) {
        self.ctx
            .bus
            .publish(WalletEvent::DepositUpdate {
                deposit: deposit.clone(),
            })
            .await;
    }
}
