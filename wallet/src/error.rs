// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The wallet error taxonomy.
//!
//! Leaf errors from the chain adapter and the store are mapped into
//! these kinds at the indexer/batcher boundary. Retries happen
//! exclusively inside the owning task; nothing above the task layer
//! retries, nothing below it decides terminality.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Caller-side input error. Never retried, surfaced immediately.
    #[error("validation error: {0}")]
    Validation(String),

    /// Freeze requested more than the available balance.
    #[error("insufficient available balance")]
    InsufficientAvailable,

    /// Settle requested more than the frozen balance.
    #[error("insufficient frozen balance")]
    InsufficientFrozen,

    /// Hot wallet cannot cover a bucket's total. Terminal for the
    /// bucket, transient for the system.
    #[error("insufficient hot wallet liquidity")]
    InsufficientHotWalletLiquidity,

    /// A native deposit's value does not cover its own sweep gas.
    /// Terminal for the deposit.
    #[error("deposit value does not cover sweep gas")]
    InsufficientAfterGas,

    /// The deposit address no longer holds the expected funds.
    /// Terminal for the deposit.
    #[error("insufficient balance at deposit address")]
    InsufficientBalance,

    /// Transport or RPC failure. Transient, counts against the retry
    /// budget.
    #[error("chain rpc error: {0}")]
    ChainRpc(String),

    /// The submitted transaction reverted on-chain.
    #[error("transaction reverted: {0}")]
    ChainReverted(String),

    /// Bounded receipt wait elapsed without an observation.
    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(String),

    /// Fatal at startup: chain id mismatch, missing keys, bad limits.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Short stable label for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            WalletError::Validation(_) => "validation",
            WalletError::InsufficientAvailable => "insufficient_available",
            WalletError::InsufficientFrozen => "insufficient_frozen",
            WalletError::InsufficientHotWalletLiquidity => "insufficient_hot_wallet_liquidity",
            WalletError::InsufficientAfterGas => "insufficient_after_gas",
            WalletError::InsufficientBalance => "insufficient_balance",
            WalletError::ChainRpc(_) => "chain_rpc",
            WalletError::ChainReverted(_) => "chain_reverted",
            WalletError::ReceiptTimeout(_) => "receipt_timeout",
            WalletError::Configuration(_) => "configuration",
            WalletError::Storage(_) => "storage",
            WalletError::Serialization(_) => "serialization",
            WalletError::Crypto(_) => "crypto",
            WalletError::Internal(_) => "internal",
        }
    }

    /// Errors worth retrying inside the owning task.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WalletError::ChainRpc(_)
                | WalletError::ReceiptTimeout(_)
                | WalletError::Storage(_)
                | WalletError::ChainReverted(_)
        )
    }

    /// Errors that fail a deposit immediately, with no retry.
    pub fn is_terminal_for_deposit(&self) -> bool {
        matches!(
            self,
            WalletError::InsufficientAfterGas | WalletError::InsufficientBalance
        )
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}

impl From<mind_wallet_types::AmountError> for WalletError {
    fn from(e: mind_wallet_types::AmountError) -> Self {
        WalletError::Validation(e.to_string())
    }
}

pub type WalletResult<T> = Result<T, WalletError>;
