// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The wallet service facade.
//!
//! This is the surface the external API layer calls: account creation,
//! balance queries, internal transfers and withdrawal requests.
//! Account creation registers the deposit address with the indexer
//! through the one-way [`ActiveAddresses`] registry; nothing in the
//! indexer ever calls back into this module.

use crate::batch::BatchProcessor;
use crate::crypto::{derive_signing_key, wallet_address, wallet_key_bytes, Cipher};
use crate::error::{WalletError, WalletResult};
use crate::indexer::ActiveAddresses;
use crate::ledger::Ledger;
use crate::notify::NotificationBus;
use crate::stores::AccountStore;
use crate::utils::now_ms;
use mind_wallet_types::{Account, Amount, Balance, WalletEvent, Withdrawal};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const MAX_USERNAME_LEN: usize = 64;

pub struct WalletService {
    accounts: AccountStore,
    ledger: Arc<Ledger>,
    bus: Arc<NotificationBus>,
    cipher: Cipher,
    pepper: String,
    active: Arc<ActiveAddresses>,
    batchers: HashMap<String, Arc<BatchProcessor>>,
}

impl WalletService {
    pub fn new(
        accounts: AccountStore,
        ledger: Arc<Ledger>,
        bus: Arc<NotificationBus>,
        cipher: Cipher,
        pepper: String,
        active: Arc<ActiveAddresses>,
        batchers: HashMap<String, Arc<BatchProcessor>>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            bus,
            cipher,
            pepper,
            active,
            batchers,
        }
    }

    /// Create an account: derive the signing keypair from the username
    /// hash (regeneration yields the same address), encrypt it at
    /// rest, and start tracking the deposit address.
    pub async fn create_account(&self, username: &str) -> WalletResult<Account> {
        validate_username(username)?;
        if self.accounts.get(username).await?.is_some() {
            return Err(WalletError::Validation(format!(
                "account {} already exists",
                username
            )));
        }

        let wallet = derive_signing_key(username, &self.pepper);
        let address = wallet_address(&wallet);
        let account = Account {
            username: username.to_string(),
            address: address.clone(),
            encrypted_key: self.cipher.encrypt(&wallet_key_bytes(&wallet)),
            created_at_ms: now_ms(),
        };
        self.accounts.insert(&account).await?;
        self.active.register(&address, username);
        info!("created account {} with deposit address {}", username, address);
        Ok(account)
    }

    pub async fn get_account(&self, username: &str) -> WalletResult<Option<Account>> {
        self.accounts.get(username).await
    }

    pub async fn balance(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
    ) -> WalletResult<Balance> {
        self.ledger.get(username, chain, currency).await
    }

    /// Internal transfer between two users; both parties are notified.
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
    ) -> WalletResult<()> {
        if self.accounts.get(from).await?.is_none() {
            return Err(WalletError::Validation(format!("unknown sender {}", from)));
        }
        if self.accounts.get(to).await?.is_none() {
            return Err(WalletError::Validation(format!("unknown receiver {}", to)));
        }
        self.ledger.transfer(from, to, chain, currency, amount).await?;
        self.bus
            .publish(WalletEvent::TransferUpdate {
                from_username: from.to_string(),
                to_username: to.to_string(),
                chain: chain.to_string(),
                currency: currency.to_string(),
                amount,
                timestamp_ms: now_ms(),
            })
            .await;
        Ok(())
    }

    pub async fn request_withdrawal(
        &self,
        username: &str,
        chain: &str,
        currency: &str,
        amount: Amount,
        to_address: &str,
    ) -> WalletResult<Withdrawal> {
        if self.accounts.get(username).await?.is_none() {
            return Err(WalletError::Validation(format!(
                "unknown account {}",
                username
            )));
        }
        let batcher = self.batchers.get(chain).ok_or_else(|| {
            WalletError::Validation(format!("unsupported chain {}", chain))
        })?;
        batcher
            .clone()
            .request_withdrawal(username, currency, amount, to_address)
            .await
    }
}

fn validate_username(username: &str) -> WalletResult<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(WalletError::Validation(
            "username must be 1-64 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(WalletError::Validation(
            "username may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn service() -> WalletService {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(NotificationBus::new());
        let ledger = Arc::new(Ledger::new(store.clone(), bus.clone()));
        WalletService::new(
            AccountStore::new(store),
            ledger,
            bus,
            Cipher::new([7u8; 32]),
            "pepper".into(),
            Arc::new(ActiveAddresses::new()),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn test_create_account_registers_address() {
        let service = service();
        let account = service.create_account("alice").await.unwrap();
        assert!(account.address.starts_with("0x"));
        assert_eq!(service.active.owner_of(&account.address).as_deref(), Some("alice"));
        // Deterministic: the same user would get the same address back.
        let again = derive_signing_key("alice", "pepper");
        assert_eq!(wallet_address(&again), account.address);
    }

    #[tokio::test]
    async fn test_create_account_rejects_duplicates_and_bad_names() {
        let service = service();
        service.create_account("alice").await.unwrap();
        assert!(service.create_account("alice").await.is_err());
        assert!(service.create_account("").await.is_err());
        assert!(service.create_account("bad name").await.is_err());
    }

    #[tokio::test]
    async fn test_transfer_requires_known_accounts() {
        let service = service();
        service.create_account("alice").await.unwrap();
        let err = service
            .transfer("alice", "bob", "mind", "MIND", "1.00".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
    }

    #[tokio::test]
    async fn test_transfer_notifies_both_parties() {
        let service = service();
        service.create_account("alice").await.unwrap();
        service.create_account("bob").await.unwrap();
        service
            .ledger
            .credit("alice", "mind", "MIND", "5.00".parse().unwrap())
            .await
            .unwrap();

        let mut bob_rx = service
            .bus
            .subscribe(crate::notify::SubscriptionFilter::for_username("bob"))
            .await;
        service
            .transfer("alice", "bob", "mind", "MIND", "2.00".parse().unwrap())
            .await
            .unwrap();

        // Bob sees his balance update and the transfer itself.
        let mut kinds = Vec::new();
        while let Ok(ev) = bob_rx.try_recv() {
            kinds.push(ev.kind());
        }
        assert!(kinds.contains(&mind_wallet_types::EventKind::BalanceUpdate));
        assert!(kinds.contains(&mind_wallet_types::EventKind::TransferUpdate));
    }

    #[tokio::test]
    async fn test_withdrawal_requires_supported_chain() {
        let service = service();
        service.create_account("bob").await.unwrap();
        let err = service
            .request_withdrawal("bob", "mind", "USDT", "50.00".parse().unwrap(), "0xdead")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
    }
}
