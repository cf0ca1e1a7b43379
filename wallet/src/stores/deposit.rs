// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{WalletError, WalletResult};
use crate::storage::{self, keys, BatchOp, KvStore};
use mind_wallet_types::{Deposit, DepositStatus};
use std::sync::Arc;

/// Persistent deposit records plus the per-deposit start-block
/// bookkeeping. Enforces the forward-only state machine: an update that
/// would move a deposit backwards is refused.
#[derive(Clone)]
pub struct DepositStore {
    store: Arc<dyn KvStore>,
}

impl DepositStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, tx_hash: &str) -> WalletResult<Option<Deposit>> {
        storage::get_json(self.store.as_ref(), &keys::deposit(tx_hash)).await
    }

    pub async fn exists(&self, tx_hash: &str) -> WalletResult<bool> {
        Ok(self.store.get(&keys::deposit(tx_hash)).await?.is_some())
    }

    /// Admit a new deposit: record plus its start block, atomically.
    pub async fn admit(&self, deposit: &Deposit, start_block: u64) -> WalletResult<()> {
        if self.exists(&deposit.tx_hash).await? {
            return Err(WalletError::Validation(format!(
                "deposit {} already admitted",
                deposit.tx_hash
            )));
        }
        if deposit.status != DepositStatus::Pending {
            return Err(WalletError::Internal(format!(
                "deposit {} must be admitted in pending state",
                deposit.tx_hash
            )));
        }
        self.store
            .write_batch(vec![
                BatchOp::put_json(keys::deposit(&deposit.tx_hash), deposit)?,
                BatchOp::Put {
                    key: keys::deposit_start_block(&deposit.tx_hash),
                    value: start_block.to_string().into_bytes(),
                },
            ])
            .await
    }

    pub async fn start_block(&self, tx_hash: &str) -> WalletResult<Option<u64>> {
        match self
            .store
            .get(&keys::deposit_start_block(tx_hash))
            .await?
        {
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| WalletError::Serialization(e.to_string()))?;
                let n = text
                    .parse::<u64>()
                    .map_err(|e| WalletError::Serialization(e.to_string()))?;
                Ok(Some(n))
            }
            None => Ok(None),
        }
    }

    /// Store an updated record, rejecting backwards state transitions.
    /// Same-status updates (confirmation counting) are allowed.
    pub async fn update(&self, deposit: &Deposit) -> WalletResult<()> {
        let current = self.get(&deposit.tx_hash).await?.ok_or_else(|| {
            WalletError::Internal(format!("deposit {} vanished", deposit.tx_hash))
        })?;
        if current.status != deposit.status
            && !current.status.can_transition_to(deposit.status)
        {
            return Err(WalletError::Internal(format!(
                "illegal deposit transition {} -> {} for {}",
                current.status, deposit.status, deposit.tx_hash
            )));
        }
        storage::put_json(self.store.as_ref(), &keys::deposit(&deposit.tx_hash), deposit).await
    }

    /// Batch ops that flip a deposit terminal and clean up its
    /// bookkeeping (start block, gas-funding tag). The caller commits
    /// them, typically together with a ledger mutation.
    pub fn terminal_ops(
        &self,
        deposit: &Deposit,
        gas_funding_hash: Option<&str>,
    ) -> WalletResult<Vec<BatchOp>> {
        debug_assert!(deposit.status.is_terminal());
        let mut ops = vec![
            BatchOp::put_json(keys::deposit(&deposit.tx_hash), deposit)?,
            BatchOp::delete(keys::deposit_start_block(&deposit.tx_hash)),
        ];
        if let Some(hash) = gas_funding_hash {
            ops.push(BatchOp::delete(keys::gas_funding_tx(hash)));
        }
        Ok(ops)
    }

    /// Flip to a terminal failure and clean up, atomically. Guards the
    /// transition the same way `update` does.
    pub async fn fail(
        &self,
        tx_hash: &str,
        reason: &str,
        gas_funding_hash: Option<&str>,
    ) -> WalletResult<Deposit> {
        let mut deposit = self
            .get(tx_hash)
            .await?
            .ok_or_else(|| WalletError::Internal(format!("deposit {} vanished", tx_hash)))?;
        if !deposit.status.can_transition_to(DepositStatus::Failed) {
            return Err(WalletError::Internal(format!(
                "illegal deposit transition {} -> failed for {}",
                deposit.status, tx_hash
            )));
        }
        deposit.status = DepositStatus::Failed;
        deposit.failure = Some(reason.to_string());
        let ops = self.terminal_ops(&deposit, gas_funding_hash)?;
        self.store.write_batch(ops).await?;
        Ok(deposit)
    }

    /// Deposits whose state is not terminal, for rebuilding the pending
    /// queues at startup.
    pub async fn list_non_terminal(&self) -> WalletResult<Vec<Deposit>> {
        let pairs = self.store.scan_prefix(keys::DEPOSIT_PREFIX).await?;
        let mut out = Vec::new();
        for (key, bytes) in pairs {
            // `depositStartBlock:` sorts outside the scan range; the
            // guard keeps that assumption explicit.
            if !key.starts_with(keys::DEPOSIT_PREFIX) {
                continue;
            }
            let deposit: Deposit = serde_json::from_slice(&bytes)?;
            if !deposit.status.is_terminal() {
                out.push(deposit);
            }
        }
        Ok(out)
    }
}
