// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node configuration.
//!
//! One [`ChainConfig`] per chain of the deployment, plus the secrets
//! block. Anything operational (intervals, retry budgets, cache TTLs)
//! has a serde default so production files stay small.

use crate::crypto::{wallet_from_key_bytes, Cipher};
use crate::error::{WalletError, WalletResult};
use crate::utils::parse_address;
use ethers::signers::{LocalWallet, Signer};
use mind_wallet_config::Config;
use mind_wallet_types::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Safety factor between the confirmation horizon and the block cache
/// TTL, so no cached block is evicted before it becomes scannable.
const CACHE_TTL_SAFETY_FACTOR: u64 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub chains: BTreeMap<String, ChainConfig>,
    pub secrets: SecretsConfig,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Config for NodeConfig {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Push profile endpoint (websocket).
    pub rpc_url: String,
    /// Pull profile endpoint (HTTP).
    pub http_rpc_url: String,
    pub chain_id: u64,
    pub native_currency: String,
    pub required_confirmations: u64,
    /// Full-precision threshold: sub-cent minimums (e.g. 0.001) must
    /// not truncate to zero, so this is not a ledger [`Amount`].
    pub min_deposit: Decimal,
    pub min_withdrawal: Amount,
    pub max_withdrawal: Amount,
    pub withdrawal_fee: Amount,
    pub withdrawal_processor_contract_address: String,
    /// ERC-20 tokens by currency symbol.
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenConfig>,

    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_block_time_ms")]
    pub average_block_time_ms: u64,
    /// Explicit block cache TTL; derived from the confirmation horizon
    /// when absent.
    #[serde(default)]
    pub block_cache_ttl_ms: Option<u64>,
    #[serde(default = "default_lookback_blocks")]
    pub recovery_lookback_blocks: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_gas_limit_erc20")]
    pub gas_limit_erc20: u64,
    #[serde(default = "default_batch_gas_limit")]
    pub default_batch_gas_limit: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_confirm_interval_ms")]
    pub confirm_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub address: String,
    pub decimals: u32,
    pub min_deposit: Decimal,
    pub min_withdrawal: Amount,
    pub max_withdrawal: Amount,
    pub withdrawal_fee: Amount,
}

/// Per-currency view the indexer and batcher work with: the native
/// currency's limits, or a token's limits plus its contract.
#[derive(Debug, Clone)]
pub struct CurrencyRules {
    pub min_deposit: Decimal,
    pub min_withdrawal: Amount,
    pub max_withdrawal: Amount,
    pub withdrawal_fee: Amount,
    pub decimals: u32,
    /// Token contract; `None` for the native currency.
    pub token_address: Option<String>,
}

impl ChainConfig {
    pub fn block_cache_ttl_ms(&self) -> u64 {
        self.block_cache_ttl_ms.unwrap_or(
            self.required_confirmations * self.average_block_time_ms * CACHE_TTL_SAFETY_FACTOR,
        )
    }

    pub fn currency_rules(&self, currency: &str) -> Option<CurrencyRules> {
        if currency == self.native_currency {
            return Some(CurrencyRules {
                min_deposit: self.min_deposit,
                min_withdrawal: self.min_withdrawal,
                max_withdrawal: self.max_withdrawal,
                withdrawal_fee: self.withdrawal_fee,
                decimals: crate::chain::units::NATIVE_DECIMALS,
                token_address: None,
            });
        }
        self.tokens.get(currency).map(|t| CurrencyRules {
            min_deposit: t.min_deposit,
            min_withdrawal: t.min_withdrawal,
            max_withdrawal: t.max_withdrawal,
            withdrawal_fee: t.withdrawal_fee,
            decimals: t.decimals,
            token_address: Some(t.address.clone()),
        })
    }

    /// All currencies this chain settles: native first, then tokens.
    pub fn currencies(&self) -> Vec<String> {
        let mut out = vec![self.native_currency.clone()];
        out.extend(self.tokens.keys().cloned());
        out
    }

    fn validate(&self, chain: &str) -> WalletResult<()> {
        if self.required_confirmations == 0 {
            return Err(WalletError::Configuration(format!(
                "[{}] required_confirmations must be at least 1",
                chain
            )));
        }
        if self.min_withdrawal > self.max_withdrawal {
            return Err(WalletError::Configuration(format!(
                "[{}] min_withdrawal exceeds max_withdrawal",
                chain
            )));
        }
        if self.window_ms == 0 {
            return Err(WalletError::Configuration(format!(
                "[{}] window_ms must be positive",
                chain
            )));
        }
        parse_address(&self.withdrawal_processor_contract_address).map_err(|_| {
            WalletError::Configuration(format!(
                "[{}] invalid withdrawal processor address {}",
                chain, self.withdrawal_processor_contract_address
            ))
        })?;
        for (symbol, token) in &self.tokens {
            parse_address(&token.address).map_err(|_| {
                WalletError::Configuration(format!(
                    "[{}] invalid token address for {}: {}",
                    chain, symbol, token.address
                ))
            })?;
            if token.min_withdrawal > token.max_withdrawal {
                return Err(WalletError::Configuration(format!(
                    "[{}] min_withdrawal exceeds max_withdrawal for {}",
                    chain, symbol
                )));
            }
        }
        let horizon = self.required_confirmations * self.average_block_time_ms;
        if self.block_cache_ttl_ms() < horizon * 2 {
            return Err(WalletError::Configuration(format!(
                "[{}] block_cache_ttl_ms {} is below twice the confirmation horizon {}; cached blocks would expire before they become scannable",
                chain,
                self.block_cache_ttl_ms(),
                horizon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// 32-byte AES key, hex encoded.
    pub encryption_key: String,
    /// Hot wallet signing key, hex encoded.
    pub hot_wallet_private_key: String,
    /// Lowercased hot wallet address.
    pub hot_wallet_address: String,
    /// Deployment-wide pepper mixed into account key derivation.
    pub account_key_pepper: String,
}

impl SecretsConfig {
    pub fn cipher(&self) -> WalletResult<Cipher> {
        Cipher::from_hex(&self.encryption_key)
            .map_err(|e| WalletError::Configuration(format!("encryption_key: {}", e)))
    }

    pub fn hot_wallet(&self) -> WalletResult<LocalWallet> {
        let bytes = hex::decode(self.hot_wallet_private_key.trim_start_matches("0x"))
            .map_err(|e| WalletError::Configuration(format!("hot_wallet_private_key: {}", e)))?;
        wallet_from_key_bytes(&bytes)
            .map_err(|e| WalletError::Configuration(format!("hot_wallet_private_key: {}", e)))
    }
}

impl NodeConfig {
    /// Fatal-at-startup checks: parseable keys and addresses, sane
    /// limits, cache TTLs above the confirmation horizon.
    pub fn validate(&self) -> WalletResult<()> {
        if self.chains.is_empty() {
            return Err(WalletError::Configuration("no chains configured".into()));
        }
        self.secrets.cipher()?;
        let hot = self.secrets.hot_wallet()?;
        let configured = parse_address(&self.secrets.hot_wallet_address).map_err(|_| {
            WalletError::Configuration(format!(
                "invalid hot_wallet_address {}",
                self.secrets.hot_wallet_address
            ))
        })?;
        if hot.address() != configured {
            return Err(WalletError::Configuration(
                "hot_wallet_address does not match hot_wallet_private_key".into(),
            ));
        }
        for (chain, cfg) in &self.chains {
            cfg.validate(chain)?;
        }
        Ok(())
    }
}

fn default_metrics_port() -> u16 {
    9184
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_block_time_ms() -> u64 {
    3_000
}

fn default_lookback_blocks() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_gas_limit_erc20() -> u64 {
    100_000
}

fn default_batch_gas_limit() -> u64 {
    1_200_000
}

fn default_scan_interval_ms() -> u64 {
    5_000
}

fn default_confirm_interval_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    3_000
}
