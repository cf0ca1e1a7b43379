// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The withdrawal batch processor.
//!
//! Withdrawal requests freeze `amount + fee` and join the current
//! (chain, currency) bucket; when the bucket's window elapses, every
//! withdrawal still eligible settles through one batch-processor call.
//! The contract is all-or-nothing, so the bucket is too: on success
//! every reservation settles, on revert or error every reservation
//! unfreezes. Per withdrawal, exactly one of the two happens, exactly
//! once - the `processing → completed|failed` transition is the guard.

#[cfg(test)]
mod tests;

use crate::abi::{ApproveCall, ProcessBatchErc20Call, ProcessBatchNativeCall};
use crate::chain::units::to_chain_units;
use crate::chain::{ChainAdapter, ReceiptOutcome};
use crate::config::{ChainConfig, CurrencyRules};
use crate::error::{WalletError, WalletResult};
use crate::ledger::Ledger;
use crate::metrics::WalletMetrics;
use crate::notify::NotificationBus;
use crate::stores::{BucketStore, WithdrawalStore};
use crate::utils::{normalize_hash, now_ms, parse_address, with_gas_buffer};
use ethers::abi::AbiEncode;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use mind_wallet_types::{Amount, Bucket, WalletEvent, Withdrawal, WithdrawalStatus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bounded wait for the settlement receipt.
const BATCH_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);
/// Bounded wait for an `approve` receipt.
const APPROVE_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BatchProcessor {
    chain: String,
    cfg: ChainConfig,
    adapter: Arc<dyn ChainAdapter>,
    ledger: Arc<Ledger>,
    withdrawals: WithdrawalStore,
    buckets: BucketStore,
    bus: Arc<NotificationBus>,
    hot_wallet: LocalWallet,
    submission_lane: Arc<Mutex<()>>,
    metrics: Arc<WalletMetrics>,
    /// Process-local settlement locks, one slot per bucket id.
    settling: Mutex<HashSet<String>>,
    /// False once shutdown starts; requests are refused first.
    accepting: AtomicBool,
    /// Settlements hold a read lease; shutdown takes the write side to
    /// drain them.
    inflight: RwLock<()>,
    cancel: CancellationToken,
}

impl BatchProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: String,
        cfg: ChainConfig,
        adapter: Arc<dyn ChainAdapter>,
        ledger: Arc<Ledger>,
        withdrawals: WithdrawalStore,
        buckets: BucketStore,
        bus: Arc<NotificationBus>,
        hot_wallet: LocalWallet,
        submission_lane: Arc<Mutex<()>>,
        metrics: Arc<WalletMetrics>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            chain,
            cfg,
            adapter,
            ledger,
            withdrawals,
            buckets,
            bus,
            hot_wallet,
            submission_lane,
            metrics,
            settling: Mutex::new(HashSet::new()),
            accepting: AtomicBool::new(true),
            inflight: RwLock::new(()),
            cancel,
        })
    }

    /// Settle every overdue bucket and re-arm timers for the rest.
    /// Bucket timers are scheduled wake-ups, not wall-clock sleeps a
    /// restart can lose; this scan is what makes that true.
    pub async fn recover_buckets(self: Arc<Self>) -> WalletResult<()> {
        let now = now_ms();
        for bucket in self.buckets.list_all().await? {
            if bucket.chain != self.chain {
                continue;
            }
            if bucket.is_expired(now) {
                info!(
                    "[{}] settling overdue bucket {} from a previous run",
                    self.chain, bucket.id
                );
                let this = self.clone();
                tokio::spawn(async move {
                    this.settle_bucket(&bucket.currency, bucket.window_index).await;
                });
            } else {
                Self::schedule_settlement(&self, &bucket);
            }
        }
        Ok(())
    }

    /// Withdrawal request path. Freezes `amount + fee` and the record
    /// insert atomically, then assigns the current bucket.
    pub async fn request_withdrawal(
        self: Arc<Self>,
        username: &str,
        currency: &str,
        amount: Amount,
        to_address: &str,
    ) -> WalletResult<Withdrawal> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(WalletError::Validation(
                "withdrawals are not being accepted (shutting down)".into(),
            ));
        }
        let rules = self.rules(currency)?;
        if amount < rules.min_withdrawal || amount > rules.max_withdrawal {
            return Err(WalletError::Validation(format!(
                "amount {} outside withdrawal limits [{}, {}]",
                amount, rules.min_withdrawal, rules.max_withdrawal
            )));
        }
        parse_address(to_address)?;

        let reserved = amount
            .checked_add(rules.withdrawal_fee)
            .map_err(|e| WalletError::Validation(e.to_string()))?;

        let withdrawal = Withdrawal {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            chain: self.chain.clone(),
            currency: currency.to_string(),
            amount,
            fee: rules.withdrawal_fee,
            to_address: to_address.to_lowercase(),
            bucket_id: None,
            tx_hash: None,
            status: WithdrawalStatus::Created,
            created_at_ms: now_ms(),
        };

        // Freeze and record creation commit together; a failed freeze
        // leaves no record, a failed insert leaves nothing frozen.
        let record_op = crate::storage::BatchOp::put_json(
            crate::storage::keys::withdrawal(&withdrawal.id),
            &withdrawal,
        )?;
        self.ledger
            .freeze_with(username, &self.chain, currency, reserved, vec![record_op])
            .await?;

        let withdrawal = Self::assign_to_bucket(&self, withdrawal).await?;
        self.metrics
            .withdrawals_requested
            .with_label_values(&[&self.chain, currency])
            .inc();
        info!(
            "[{}] accepted withdrawal {} of {} {} for {} (reserved {})",
            self.chain, withdrawal.id, amount, currency, username, reserved
        );
        self.publish(&withdrawal).await;
        Ok(withdrawal)
    }

    /// Append to the current window's bucket, creating it lazily and
    /// arming its settlement timer on creation.
    async fn assign_to_bucket(
        this: &Arc<Self>,
        mut withdrawal: Withdrawal,
    ) -> WalletResult<Withdrawal> {
        let now = now_ms();
        let window_index = Bucket::window_index(now, this.cfg.window_ms);

        let existing = this
            .buckets
            .get(&this.chain, &withdrawal.currency, window_index)
            .await?;
        let mut bucket = match existing {
            Some(bucket) if !bucket.is_expired(now) => bucket,
            _ => {
                let bucket = Bucket {
                    id: Bucket::bucket_id(&this.chain, &withdrawal.currency, window_index),
                    chain: this.chain.clone(),
                    currency: withdrawal.currency.clone(),
                    window_index,
                    withdrawal_ids: Vec::new(),
                    created_at_ms: now,
                    expires_at_ms: now + this.cfg.window_ms,
                };
                debug!(
                    "[{}] opened bucket {} (closes in {}ms)",
                    this.chain, bucket.id, this.cfg.window_ms
                );
                Self::schedule_settlement(this, &bucket);
                bucket
            }
        };

        bucket.withdrawal_ids.push(withdrawal.id.clone());
        this.buckets.put(&bucket).await?;

        withdrawal.bucket_id = Some(bucket.id.clone());
        withdrawal.status = WithdrawalStatus::AddedToBucket;
        this.withdrawals.update(&withdrawal).await?;
        Ok(withdrawal)
    }

    fn schedule_settlement(this: &Arc<Self>, bucket: &Bucket) {
        let this = this.clone();
        let currency = bucket.currency.clone();
        let window_index = bucket.window_index;
        let delay = Duration::from_millis(bucket.expires_at_ms.saturating_sub(now_ms()));
        let cancel = this.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = time::sleep_until(Instant::now() + delay) => {
                    this.settle_bucket(&currency, window_index).await;
                }
            }
        });
    }

    /// Settle one bucket. Safe to call more than once: a process-local
    /// lock makes concurrent calls no-ops and the withdrawal state
    /// machine makes repeated calls no-ops.
    pub async fn settle_bucket(&self, currency: &str, window_index: u64) {
        let bucket_id = Bucket::bucket_id(&self.chain, currency, window_index);
        {
            let mut settling = self.settling.lock().await;
            if !settling.insert(bucket_id.clone()) {
                debug!("[{}] bucket {} already settling", self.chain, bucket_id);
                return;
            }
        }
        let _lease = self.inflight.read().await;

        if let Err(e) = self.settle_bucket_inner(currency, window_index).await {
            error!("[{}] settlement of {} failed: {}", self.chain, bucket_id, e);
        }

        self.settling.lock().await.remove(&bucket_id);
    }

    async fn settle_bucket_inner(&self, currency: &str, window_index: u64) -> WalletResult<()> {
        let Some(bucket) = self.buckets.get(&self.chain, currency, window_index).await? else {
            return Ok(());
        };

        let all = self.withdrawals.list_by_ids(&bucket.withdrawal_ids).await?;
        let mut eligible: Vec<Withdrawal> = all
            .into_iter()
            .filter(|w| w.status == WithdrawalStatus::AddedToBucket)
            .collect();

        if eligible.is_empty() {
            debug!("[{}] bucket {} has nothing to settle", self.chain, bucket.id);
            self.buckets.delete(&bucket).await?;
            self.metrics
                .buckets_settled
                .with_label_values(&[&self.chain, currency, "empty"])
                .inc();
            return Ok(());
        }

        for withdrawal in eligible.iter_mut() {
            withdrawal.status = WithdrawalStatus::Processing;
            self.withdrawals.update(withdrawal).await?;
            self.publish(withdrawal).await;
        }

        let rules = self.rules(currency)?;
        let recipients: Vec<Address> = eligible
            .iter()
            .map(|w| parse_address(&w.to_address))
            .collect::<WalletResult<_>>()?;
        let amounts: Vec<U256> = eligible
            .iter()
            .map(|w| to_chain_units(w.amount, rules.decimals))
            .collect();
        let total: U256 = amounts.iter().fold(U256::zero(), |acc, a| acc + a);
        let hot = self.hot_wallet.address();
        let processor = parse_address(&self.cfg.withdrawal_processor_contract_address)?;

        // Liquidity precheck; a dry hot wallet fails the whole bucket
        // without touching the chain.
        match self.precheck_liquidity(&rules, hot, processor, total).await {
            Ok(()) => {}
            Err(WalletError::InsufficientHotWalletLiquidity) => {
                warn!(
                    "[{}] bucket {} needs {} {} units, hot wallet short - failing {} withdrawals",
                    self.chain,
                    bucket.id,
                    total,
                    currency,
                    eligible.len()
                );
                self.fail_all(&eligible, WalletError::InsufficientHotWalletLiquidity)
                    .await;
                self.buckets.delete(&bucket).await?;
                self.metrics
                    .buckets_settled
                    .with_label_values(&[&self.chain, currency, "liquidity"])
                    .inc();
                return Ok(());
            }
            Err(e) => {
                self.fail_all(&eligible, e).await;
                self.buckets.delete(&bucket).await?;
                self.metrics
                    .buckets_settled
                    .with_label_values(&[&self.chain, currency, "failed"])
                    .inc();
                return Ok(());
            }
        }

        let outcome = self
            .submit_batch(&rules, processor, recipients, amounts, total)
            .await;

        match outcome {
            Ok(tx_hash) => {
                for withdrawal in eligible.iter_mut() {
                    withdrawal.status = WithdrawalStatus::Completed;
                    withdrawal.tx_hash = Some(tx_hash.clone());
                    let reserved = withdrawal.reserved();
                    let op = match self.withdrawals.update_op(withdrawal).await {
                        Ok(op) => op,
                        Err(e) => {
                            error!(
                                "[{}] completed withdrawal {} could not build its record op: {}",
                                self.chain, withdrawal.id, e
                            );
                            continue;
                        }
                    };
                    if let Err(e) = self
                        .ledger
                        .settle_with(
                            &withdrawal.username,
                            &self.chain,
                            currency,
                            reserved,
                            vec![op],
                        )
                        .await
                    {
                        error!(
                            "[{}] reservation settle failed for withdrawal {}: {}",
                            self.chain, withdrawal.id, e
                        );
                        continue;
                    }
                    self.metrics
                        .withdrawals_completed
                        .with_label_values(&[&self.chain, currency])
                        .inc();
                    self.publish(withdrawal).await;
                }
                info!(
                    "[{}] bucket {} settled in {} ({} withdrawals)",
                    self.chain,
                    bucket.id,
                    tx_hash,
                    eligible.len()
                );
                self.metrics
                    .buckets_settled
                    .with_label_values(&[&self.chain, currency, "success"])
                    .inc();
            }
            Err(e) => {
                warn!(
                    "[{}] batch submission for {} failed: {} - unfreezing {} withdrawals",
                    self.chain,
                    bucket.id,
                    e,
                    eligible.len()
                );
                self.fail_all(&eligible, e).await;
                self.metrics
                    .buckets_settled
                    .with_label_values(&[&self.chain, currency, "failed"])
                    .inc();
            }
        }

        self.buckets.delete(&bucket).await?;
        Ok(())
    }

    async fn precheck_liquidity(
        &self,
        rules: &CurrencyRules,
        hot: Address,
        processor: Address,
        total: U256,
    ) -> WalletResult<()> {
        match &rules.token_address {
            None => {
                let balance = self.adapter.native_balance(hot).await?;
                if balance < total {
                    return Err(WalletError::InsufficientHotWalletLiquidity);
                }
            }
            Some(token_address) => {
                let token = parse_address(token_address)?;
                let balance = self.adapter.token_balance(token, hot).await?;
                if balance < total {
                    return Err(WalletError::InsufficientHotWalletLiquidity);
                }
                let allowance = self.adapter.token_allowance(token, hot, processor).await?;
                if allowance < total {
                    self.approve(token, processor, total).await?;
                }
            }
        }
        Ok(())
    }

    async fn approve(&self, token: Address, processor: Address, total: U256) -> WalletResult<()> {
        let data = ApproveCall {
            spender: processor,
            amount: total,
        }
        .encode();
        let mut tx: TypedTransaction = TransactionRequest::new().to(token).data(data).into();
        tx.set_from(self.hot_wallet.address());
        let estimated = self.adapter.estimate_gas(&tx).await?;
        tx.set_gas(with_gas_buffer(estimated));

        let approve_hash = {
            let _lane = self.submission_lane.lock().await;
            self.adapter.send_signed(tx, &self.hot_wallet).await?
        };
        debug!(
            "[{}] approving processor for {} units in {:#x}",
            self.chain, total, approve_hash
        );
        match self
            .adapter
            .wait_for_receipt(approve_hash, 1, APPROVE_RECEIPT_TIMEOUT)
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

    /// Build, submit and await the single settlement call. Returns the
    /// batch transaction hash on success.
    async fn submit_batch(
        &self,
        rules: &CurrencyRules,
        processor: Address,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
        total: U256,
    ) -> WalletResult<String> {
        let mut request = TransactionRequest::new().to(processor);
        match &rules.token_address {
            None => {
                request = request
                    .data(ProcessBatchNativeCall { recipients, amounts }.encode())
                    .value(total);
            }
            Some(token_address) => {
                let token = parse_address(token_address)?;
                request = request.data(
                    ProcessBatchErc20Call {
                        token,
                        recipients,
                        amounts,
                    }
                    .encode(),
                );
            }
        }
        let mut tx: TypedTransaction = request.into();
        tx.set_from(self.hot_wallet.address());

        // Flat 20% buffer over the estimate; estimation reverts fall
        // back to the component default.
        let gas = match self.adapter.estimate_gas(&tx).await {
            Ok(estimated) => with_gas_buffer(estimated),
            Err(e) => {
                warn!(
                    "[{}] batch gas estimation failed ({}), using default limit {}",
                    self.chain, e, self.cfg.default_batch_gas_limit
                );
                U256::from(self.cfg.default_batch_gas_limit)
            }
        };
        tx.set_gas(gas);

        let batch_hash = {
            let _lane = self.submission_lane.lock().await;
            self.adapter.send_signed(tx, &self.hot_wallet).await?
        };

        match self
            .adapter
            .wait_for_receipt(batch_hash, 1, BATCH_RECEIPT_TIMEOUT)
            .await?
        {
            ReceiptOutcome::Success { .. } => Ok(normalize_hash(&batch_hash)),
            ReceiptOutcome::Reverted { tx_hash } => {
                Err(WalletError::ChainReverted(normalize_hash(&tx_hash)))
            }
            ReceiptOutcome::TimedOut { tx_hash } => {
                Err(WalletError::ReceiptTimeout(normalize_hash(&tx_hash)))
            }
        }
    }

    /// Fail every withdrawal and restore its reservation. The record
    /// flip and the unfreeze commit together; the state machine
    /// guarantees a reservation is restored at most once.
    async fn fail_all(&self, withdrawals: &[Withdrawal], error: WalletError) {
        for withdrawal in withdrawals {
            let mut failed = withdrawal.clone();
            failed.status = WithdrawalStatus::Failed;
            let reserved = failed.reserved();
            let op = match self.withdrawals.update_op(&failed).await {
                Ok(op) => op,
                Err(e) => {
                    error!(
                        "[{}] failed withdrawal {} could not build its record op: {}",
                        self.chain, failed.id, e
                    );
                    continue;
                }
            };
            if let Err(e) = self
                .ledger
                .unfreeze_with(
                    &failed.username,
                    &self.chain,
                    &failed.currency,
                    reserved,
                    vec![op],
                )
                .await
            {
                error!(
                    "[{}] unfreeze failed for withdrawal {}: {}",
                    self.chain, failed.id, e
                );
                continue;
            }
            self.metrics
                .withdrawals_failed
                .with_label_values(&[&self.chain, &failed.currency, error.error_type()])
                .inc();
            self.publish(&failed).await;
        }
    }

    /// Stop accepting, then drain in-flight settlements.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let _ = self.inflight.write().await;
        info!("[{}] batch processor drained", self.chain);
    }

    fn rules(&self, currency: &str) -> WalletResult<CurrencyRules> {
        self.cfg.currency_rules(currency).ok_or_else(|| {
            WalletError::Validation(format!(
                "[{}] unsupported currency {}",
                self.chain, currency
            ))
        })
    }

    async fn publish(&self, withdrawal: &Withdrawal) {
        self.bus
            .publish(WalletEvent::WithdrawalUpdate {
                withdrawal: withdrawal.clone(),
            })
            .await;
    }
}
