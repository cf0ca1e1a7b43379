// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{WalletError, WalletResult};
use crate::storage::{self, keys, KvStore};
use mind_wallet_types::Account;
use std::sync::Arc;

#[derive(Clone)]
pub struct AccountStore {
    store: Arc<dyn KvStore>,
}

impl AccountStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, username: &str) -> WalletResult<Option<Account>> {
        storage::get_json(self.store.as_ref(), &keys::account(username)).await
    }

    /// Insert a new account. Usernames are unique keys; overwriting an
    /// existing account would orphan its funds.
    pub async fn insert(&self, account: &Account) -> WalletResult<()> {
        if self.get(&account.username).await?.is_some() {
            return Err(WalletError::Validation(format!(
                "account {} already exists",
                account.username
            )));
        }
        storage::put_json(
            self.store.as_ref(),
            &keys::account(&account.username),
            account,
        )
        .await
    }

    /// All accounts, for rebuilding the active address set at startup.
    pub async fn list(&self) -> WalletResult<Vec<Account>> {
        let pairs = self.store.scan_prefix(keys::ACCOUNT_PREFIX).await?;
        pairs
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(WalletError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn account(username: &str) -> Account {
        Account {
            username: username.into(),
            address: format!("0x{:040x}", username.len()),
            encrypted_key: "00:11".into(),
            created_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let accounts = AccountStore::new(Arc::new(MemoryStore::new()));
        accounts.insert(&account("alice")).await.unwrap();
        let got = accounts.get("alice").await.unwrap().unwrap();
        assert_eq!(got.username, "alice");
        assert!(accounts.get("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate() {
        let accounts = AccountStore::new(Arc::new(MemoryStore::new()));
        accounts.insert(&account("alice")).await.unwrap();
        assert!(accounts.insert(&account("alice")).await.is_err());
    }

    #[tokio::test]
    async fn test_list_returns_all() {
        let accounts = AccountStore::new(Arc::new(MemoryStore::new()));
        accounts.insert(&account("alice")).await.unwrap();
        accounts.insert(&account("bob")).await.unwrap();
        let all = accounts.list().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
