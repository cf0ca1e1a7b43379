// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The per-user (chain, currency) balance ledger.
//!
//! Every value mutation in the system goes through here. Balances keep
//! an available/frozen split; both halves stay non-negative after every
//! committed operation. Arithmetic happens on integer scaled units; the
//! store batch is the commit point, so a mutation plus its caller's
//! record updates land atomically or not at all.

use crate::error::{WalletError, WalletResult};
use crate::notify::NotificationBus;
use crate::storage::{self, keys, BatchOp, KvStore};
use mind_wallet_types::{Amount, Balance, WalletEvent};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct Ledger {
    store: Arc<dyn KvStore>,
    bus: Arc<NotificationBus>,
    /// Single-writer discipline over balance keys.
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(store: Arc<dyn KvStore>, bus: Arc<NotificationBus>) -> Self {
        Self {
            store,
            bus,
            write_lock: Mutex::new(()),
        }
    }

    /// Current balance; a zero balance if none exists. Never fails on
    /// absence.
    pub async fn get(&self, username: &str, chain: &str, currency: &str) -> WalletResult<Balance> {
        let key = keys::balance(username, chain, currency);
        Ok(storage::get_json::<Balance>(self.store.as_ref(), &key)
            .await?
            .unwrap_or_default())
    }

    /// Add to `available`.
    pub async fn credit(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
    ) -> WalletResult<Balance> {
        self.credit_with(username, chain, currency, amount, Vec::new())
            .await
    }

    /// Add to `available`, committing `extra_ops` in the same batch.
    /// This is how a deposit's `confirmed → credited` flip and its
    /// ledger increment become one logical operation.
    pub async fn credit_with(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
        extra_ops: Vec<BatchOp>,
    ) -> WalletResult<Balance> {
        let _guard = self.write_lock.lock().await;
        let mut balance = self.get(username, chain, currency).await?;
        balance.available = balance.available.checked_add(amount).map_err(|_| {
            WalletError::Validation(format!(
                "credit of {} would overflow available balance",
                amount
            ))
        })?;
        self.commit(username, chain, currency, balance, extra_ops)
            .await?;
        debug!(
            "[{}] credited {} {} to {}: available={}",
            chain, amount, currency, username, balance.available
        );
        Ok(balance)
    }

    /// Move `amount` from `available` to `frozen`.
    pub async fn freeze(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
    ) -> WalletResult<Balance> {
        self.freeze_with(username, chain, currency, amount, Vec::new())
            .await
    }

    pub async fn freeze_with(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
        extra_ops: Vec<BatchOp>,
    ) -> WalletResult<Balance> {
        let _guard = self.write_lock.lock().await;
        let mut balance = self.get(username, chain, currency).await?;
        balance.available = balance
            .available
            .checked_sub(amount)
            .map_err(|_| WalletError::InsufficientAvailable)?;
        balance.frozen = balance
            .frozen
            .checked_add(amount)
            .map_err(|_| WalletError::Validation("frozen balance overflow".into()))?;
        self.commit(username, chain, currency, balance, extra_ops)
            .await?;
        Ok(balance)
    }

    /// Move back from `frozen` to `available`. Deliberately lenient:
    /// if `amount` exceeds `frozen`, whatever is actually movable moves
    /// and the call succeeds, so compensating unfreezes after retries
    /// never cascade into fatal errors. Returns the moved amount.
    pub async fn unfreeze(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
    ) -> WalletResult<Amount> {
        self.unfreeze_with(username, chain, currency, amount, Vec::new())
            .await
    }

    pub async fn unfreeze_with(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
        extra_ops: Vec<BatchOp>,
    ) -> WalletResult<Amount> {
        let _guard = self.write_lock.lock().await;
        let mut balance = self.get(username, chain, currency).await?;
        let (frozen_rest, movable) = balance.frozen.saturating_sub(amount);
        if movable < amount {
            warn!(
                "unfreeze of {} {} for {} on {} exceeds frozen balance {}; moving {} only",
                amount, currency, username, chain, balance.frozen, movable
            );
        }
        balance.frozen = frozen_rest;
        balance.available = balance
            .available
            .checked_add(movable)
            .map_err(|_| WalletError::Validation("available balance overflow".into()))?;
        self.commit(username, chain, currency, balance, extra_ops)
            .await?;
        Ok(movable)
    }

    /// Deduct from `frozen` without touching `available`: the funds
    /// have left custody.
    pub async fn settle(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
    ) -> WalletResult<Balance> {
        self.settle_with(username, chain, currency, amount, Vec::new())
            .await
    }

    pub async fn settle_with(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
        extra_ops: Vec<BatchOp>,
    ) -> WalletResult<Balance> {
        let _guard = self.write_lock.lock().await;
        let mut balance = self.get(username, chain, currency).await?;
        balance.frozen = balance
            .frozen
            .checked_sub(amount)
            .map_err(|_| WalletError::InsufficientFrozen)?;
        self.commit(username, chain, currency, balance, extra_ops)
            .await?;
        Ok(balance)
    }

    /// Move `amount` between two users' available balances. Both sides
    /// commit in one batch or neither does.
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
    ) -> WalletResult<(Balance, Balance)> {
        if from == to {
            return Err(WalletError::Validation(
                "transfer sender and receiver must differ".into(),
            ));
        }
        let _guard = self.write_lock.lock().await;
        let mut sender = self.get(from, chain, currency).await?;
        let mut receiver = self.get(to, chain, currency).await?;

        sender.available = sender
            .available
            .checked_sub(amount)
            .map_err(|_| WalletError::InsufficientAvailable)?;
        receiver.available = receiver
            .available
            .checked_add(amount)
            .map_err(|_| WalletError::Validation("receiver balance overflow".into()))?;

        self.store
            .write_batch(vec![
                BatchOp::put_json(keys::balance(from, chain, currency), &sender)?,
                BatchOp::put_json(keys::balance(to, chain, currency), &receiver)?,
            ])
            .await?;

        self.publish_balance(from, chain, currency, sender).await;
        self.publish_balance(to, chain, currency, receiver).await;
        Ok((sender, receiver))
    }

    async fn commit(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        balance: Balance,
        extra_ops: Vec<BatchOp>,
    ) -> WalletResult<()> {
        let mut ops = vec![BatchOp::put_json(
            keys::balance(username, chain, currency),
            &balance,
        )?];
        ops.extend(extra_ops);
        self.store.write_batch(ops).await?;
        self.publish_balance(username, chain, currency, balance)
            .await;
        Ok(())
    }

    async fn publish_balance(&self, username: &str, chain: &str, currency: &str, balance: Balance) {
        self.bus
            .publish(WalletEvent::BalanceUpdate {
                username: username.to_string(),
                chain: chain.to_string(),
                currency: currency.to_string(),
                balance,
            })
            .await;
    }
}
