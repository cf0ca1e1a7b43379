// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Indexer bookkeeping: ingest progress and the gas-funding filter.

use crate::error::{WalletError, WalletResult};
use crate::storage::{keys, KvStore};
use std::sync::Arc;

/// Last ingested block per chain, the resume point for recovery.
#[derive(Clone)]
pub struct ProgressStore {
    store: Arc<dyn KvStore>,
}

impl ProgressStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn last_processed_block(&self, chain: &str) -> WalletResult<Option<u64>> {
        match self.store.get(&keys::last_processed_block(chain)).await? {
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| WalletError::Serialization(e.to_string()))?;
                Ok(Some(text.parse::<u64>().map_err(|e| {
                    WalletError::Serialization(e.to_string())
                })?))
            }
            None => Ok(None),
        }
    }

    /// Monotonic: a lower block number than the stored one is ignored.
    pub async fn advance_last_processed_block(&self, chain: &str, number: u64) -> WalletResult<()> {
        if let Some(current) = self.last_processed_block(chain).await? {
            if number <= current {
                return Ok(());
            }
        }
        self.store
            .put(
                &keys::last_processed_block(chain),
                number.to_string().into_bytes(),
            )
            .await
    }
}

/// Persisted set of hot-wallet gas top-up transaction hashes. Anything
/// tagged here is invisible to deposit admission until the associated
/// deposit reaches a terminal state; persistence makes the filter
/// survive a restart between "funded gas" and "sweep observed".
#[derive(Clone)]
pub struct GasFundingStore {
    store: Arc<dyn KvStore>,
}

impl GasFundingStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn tag(&self, funding_tx_hash: &str, deposit_tx_hash: &str) -> WalletResult<()> {
        self.store
            .put(
                &keys::gas_funding_tx(funding_tx_hash),
                deposit_tx_hash.as_bytes().to_vec(),
            )
            .await
    }

    pub async fn contains(&self, funding_tx_hash: &str) -> WalletResult<bool> {
        Ok(self
            .store
            .get(&keys::gas_funding_tx(funding_tx_hash))
            .await?
            .is_some())
    }

    /// The funding hash a deposit recorded, if any. Needed to clean the
    /// filter up when the deposit goes terminal.
    pub async fn untag(&self, funding_tx_hash: &str) -> WalletResult<()> {
        self.store
            .delete(&keys::gas_funding_tx(funding_tx_hash))
            .await
    }
}
