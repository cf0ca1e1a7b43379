// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persisted record types and their state machines.
//!
//! Records are stored as JSON blobs in the key/value store. State
//! transitions are forward-only; the typed stores refuse anything a
//! `can_transition_to` check rejects, so a record can never move
//! backwards through its lifecycle.

use crate::amount::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One custodial account. The deposit address is reused across every
/// chain of the EVM family this deployment targets; the signing key is
/// stored encrypted (`iv:ciphertext` hex) and is the sole authority to
/// sweep funds out of the deposit address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    /// Lowercased 0x-prefixed EVM address.
    pub address: String,
    /// AES-256-CBC encrypted signing key, `iv:ciphertext` hex encoded.
    pub encrypted_key: String,
    pub created_at_ms: u64,
}

/// Per-(username, chain, currency) balance with the available/frozen
/// split. Total owed to the user is `available + frozen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub available: Amount,
    pub frozen: Amount,
}

impl Balance {
    pub fn total(&self) -> Amount {
        self.available
            .checked_add(self.frozen)
            .expect("balance halves are individually representable")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Confirming,
    Confirmed,
    Credited,
    Failed,
}

impl DepositStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositStatus::Credited | DepositStatus::Failed)
    }

    /// Forward-only lifecycle: `pending → confirming → confirmed →
    /// credited`, with `failed` reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: DepositStatus) -> bool {
        use DepositStatus::*;
        match (self, next) {
            (Pending, Confirming) | (Pending, Confirmed) => true,
            (Confirming, Confirming) | (Confirming, Confirmed) => true,
            (Confirmed, Credited) => true,
            (Pending, Failed) | (Confirming, Failed) | (Confirmed, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirming => "confirming",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Credited => "credited",
            DepositStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observed inbound transfer to a tracked deposit address, keyed by
/// the originating transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Originating transaction hash (lowercased 0x hex), the record key.
    pub tx_hash: String,
    pub username: String,
    pub chain: String,
    pub currency: String,
    pub amount: Amount,
    pub from_address: String,
    pub to_address: String,
    pub required_confirmations: u64,
    /// Observed confirmations, capped at `required_confirmations`.
    pub confirmations: u64,
    pub status: DepositStatus,
    pub retries: u32,
    pub created_at_ms: u64,
    /// Populated on terminal failure with the error kind label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Created,
    AddedToBucket,
    Processing,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Failed)
    }

    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        match (self, next) {
            (Created, AddedToBucket) => true,
            (AddedToBucket, Processing) => true,
            (Processing, Completed) => true,
            (Created, Failed) | (AddedToBucket, Failed) | (Processing, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Created => "created",
            WithdrawalStatus::AddedToBucket => "added_to_bucket",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-initiated withdrawal, keyed by a generated UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: String,
    pub username: String,
    pub chain: String,
    pub currency: String,
    pub amount: Amount,
    /// Flat withdrawal fee frozen together with the amount.
    pub fee: Amount,
    pub to_address: String,
    /// Stable once assigned; the bucket exists until this withdrawal is
    /// terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<String>,
    /// Settlement batch transaction hash, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub status: WithdrawalStatus,
    pub created_at_ms: u64,
}

impl Withdrawal {
    /// The amount frozen when the request was accepted.
    pub fn reserved(&self) -> Amount {
        self.amount
            .checked_add(self.fee)
            .expect("amount and fee were validated at request time")
    }
}

/// Time-windowed settlement slot for one (chain, currency).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// `{chain}:{currency}:{window_index}`.
    pub id: String,
    pub chain: String,
    pub currency: String,
    pub window_index: u64,
    pub withdrawal_ids: Vec<String>,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Bucket {
    pub fn bucket_id(chain: &str, currency: &str, window_index: u64) -> String {
        format!("{}:{}:{}", chain, currency, window_index)
    }

    pub fn window_index(now_ms: u64, window_ms: u64) -> u64 {
        now_ms / window_ms
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Minimal transaction view kept in the block cache: just what the
/// deposit scanner needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTransaction {
    pub hash: String,
    pub from: String,
    /// Absent for contract creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Native value in wei, decimal string.
    pub value_wei: String,
    /// True when the calldata is empty (a plain value transfer).
    pub input_empty: bool,
}

/// A fetched block held until it is old enough to scan for deposits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBlock {
    pub chain: String,
    pub number: u64,
    pub hash: String,
    pub transactions: Vec<CachedTransaction>,
    pub cached_at_ms: u64,
    pub ttl_ms: u64,
}

impl CachedBlock {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.cached_at_ms) >= self.ttl_ms
    }
}
