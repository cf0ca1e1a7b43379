// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{WalletError, WalletResult};
use crate::storage::{self, keys, BatchOp, KvStore};
use mind_wallet_types::{Withdrawal, WithdrawalStatus};
use std::sync::Arc;

/// Persistent withdrawal records. Forward-only state machine; the
/// bucket id is stable once assigned.
#[derive(Clone)]
pub struct WithdrawalStore {
    store: Arc<dyn KvStore>,
}

impl WithdrawalStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> WalletResult<Option<Withdrawal>> {
        storage::get_json(self.store.as_ref(), &keys::withdrawal(id)).await
    }

    pub async fn insert(&self, withdrawal: &Withdrawal) -> WalletResult<()> {
        if self.get(&withdrawal.id).await?.is_some() {
            return Err(WalletError::Internal(format!(
                "withdrawal id collision: {}",
                withdrawal.id
            )));
        }
        storage::put_json(
            self.store.as_ref(),
            &keys::withdrawal(&withdrawal.id),
            withdrawal,
        )
        .await
    }

    /// Store an updated record, enforcing the state machine and bucket
    /// id stability.
    pub async fn update(&self, withdrawal: &Withdrawal) -> WalletResult<()> {
        let current = self.get(&withdrawal.id).await?.ok_or_else(|| {
            WalletError::Internal(format!("withdrawal {} vanished", withdrawal.id))
        })?;
        if current.status != withdrawal.status
            && !current.status.can_transition_to(withdrawal.status)
        {
            return Err(WalletError::Internal(format!(
                "illegal withdrawal transition {} -> {} for {}",
                current.status, withdrawal.status, withdrawal.id
            )));
        }
        if let Some(assigned) = &current.bucket_id {
            if withdrawal.bucket_id.as_deref() != Some(assigned.as_str()) {
                return Err(WalletError::Internal(format!(
                    "bucket id of withdrawal {} is immutable once assigned",
                    withdrawal.id
                )));
            }
        }
        storage::put_json(
            self.store.as_ref(),
            &keys::withdrawal(&withdrawal.id),
            withdrawal,
        )
        .await
    }

    /// Batch op for an updated record, transition-checked. Used when a
    /// terminal flip must commit atomically with a ledger mutation.
    pub async fn update_op(&self, withdrawal: &Withdrawal) -> WalletResult<BatchOp> {
        let current = self.get(&withdrawal.id).await?.ok_or_else(|| {
            WalletError::Internal(format!("withdrawal {} vanished", withdrawal.id))
        })?;
        if current.status != withdrawal.status
            && !current.status.can_transition_to(withdrawal.status)
        {
            return Err(WalletError::Internal(format!(
                "illegal withdrawal transition {} -> {} for {}",
                current.status, withdrawal.status, withdrawal.id
            )));
        }
        BatchOp::put_json(keys::withdrawal(&withdrawal.id), withdrawal)
    }

    pub async fn list_by_ids(&self, ids: &[String]) -> WalletResult<Vec<Withdrawal>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(w) = self.get(id).await? {
                out.push(w);
            }
        }
        Ok(out)
    }

    pub async fn list_non_terminal(&self) -> WalletResult<Vec<Withdrawal>> {
        let pairs = self.store.scan_prefix(keys::WITHDRAWAL_PREFIX).await?;
        let mut out = Vec::new();
        for (_, bytes) in pairs {
            let w: Withdrawal = serde_json::from_slice(&bytes)?;
            if !w.status.is_terminal() {
                out.push(w);
            }
        }
        Ok(out)
    }
}
