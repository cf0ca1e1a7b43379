// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The persistence boundary.
//!
//! The embedded key/value engine is an external collaborator; this
//! module pins the interface the core depends on: a key-prefixed map of
//! JSON blobs with atomic batch writes and lexicographic prefix scans.
//! [`MemoryStore`] is the in-process implementation used by the node
//! and by every test.

use crate::error::{WalletError, WalletResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

/// Key prefixes of the persistent layout. `:` is the hierarchical
/// separator throughout.
pub mod keys {
    pub fn account(username: &str) -> String {
        format!("account:{}", username)
    }

    pub fn balance(username: &str, chain: &str, currency: &str) -> String {
        format!("balance:{}:{}:{}", username, chain, currency)
    }

    pub fn deposit(tx_hash: &str) -> String {
        format!("deposit:{}", tx_hash)
    }

    pub fn deposit_start_block(tx_hash: &str) -> String {
        format!("depositStartBlock:{}", tx_hash)
    }

    pub fn withdrawal(id: &str) -> String {
        format!("withdrawal:{}", id)
    }

    pub fn bucket(chain: &str, currency: &str, window_index: u64) -> String {
        format!("bucket:{}:{}:{}", chain, currency, window_index)
    }

    pub fn block_cache(chain: &str, number: u64) -> String {
        format!("blockCache:{}:{}", chain, number)
    }

    pub fn gas_funding_tx(tx_hash: &str) -> String {
        format!("gasFundingTx:{}", tx_hash)
    }

    pub fn last_processed_block(chain: &str) -> String {
        format!("lastProcessedBlock:{}", chain)
    }

    pub const ACCOUNT_PREFIX: &str = "account:";
    pub const DEPOSIT_PREFIX: &str = "deposit:";
    pub const WITHDRAWAL_PREFIX: &str = "withdrawal:";
    pub const BUCKET_PREFIX: &str = "bucket:";
    pub const BLOCK_CACHE_PREFIX: &str = "blockCache:";
}

/// One operation of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl BatchOp {
    pub fn put_json<T: Serialize>(key: String, value: &T) -> WalletResult<BatchOp> {
        Ok(BatchOp::Put {
            key,
            value: serde_json::to_vec(value)?,
        })
    }

    pub fn delete(key: String) -> BatchOp {
        BatchOp::Delete { key }
    }
}

/// Key-prefixed map with atomic batch writes. The single serialisation
/// point of the system: multi-key updates must go through
/// [`KvStore::write_batch`].
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> WalletResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> WalletResult<()>;

    async fn delete(&self, key: &str) -> WalletResult<()>;

    /// Apply all operations or none of them.
    async fn write_batch(&self, ops: Vec<BatchOp>) -> WalletResult<()>;

    /// All pairs in the lexicographic range `[prefix, prefix + 0xFFFF]`,
    /// key-ordered.
    async fn scan_prefix(&self, prefix: &str) -> WalletResult<Vec<(String, Vec<u8>)>>;
}

/// JSON read helper shared by the typed stores.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> WalletResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// JSON write helper shared by the typed stores.
pub async fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> WalletResult<()> {
    store.put(key, serde_json::to_vec(value)?).await
}

/// BTreeMap-backed store. Writes take the map lock for their whole
/// batch, which is what makes the batch atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> WalletResult<Option<Vec<u8>>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> WalletResult<()> {
        self.inner.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> WalletResult<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> WalletResult<()> {
        let mut map = self.inner.write().await;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> WalletResult<Vec<(String, Vec<u8>)>> {
        let upper = format!("{}\u{ffff}", prefix);
        let map = self.inner.read().await;
        Ok(map
            .range::<String, _>((Bound::Included(&prefix.to_string()), Bound::Included(&upper)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// A store wrapper that can be armed to fail one write, simulating a
/// crash between logical steps followed by a restart.
#[cfg(test)]
pub struct FailingStore {
    pub inner: MemoryStore,
    /// Writes allowed before the next failure; `u64::MAX` disarms.
    allowed_writes: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl FailingStore {
    const DISARMED: u64 = u64::MAX;

    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            allowed_writes: std::sync::atomic::AtomicU64::new(Self::DISARMED),
        }
    }

    /// Let `writes` more writes through, then fail the one after, then
    /// behave normally again (the "restart").
    pub fn arm(&self, writes: u64) {
        self.allowed_writes
            .store(writes, std::sync::atomic::Ordering::SeqCst);
    }

    fn consume_write(&self) -> WalletResult<()> {
        use std::sync::atomic::Ordering;
        loop {
            let left = self.allowed_writes.load(Ordering::SeqCst);
            if left == Self::DISARMED {
                return Ok(());
            }
            if left == 0 {
                self.allowed_writes.store(Self::DISARMED, Ordering::SeqCst);
                return Err(WalletError::Storage("simulated crash".into()));
            }
            if self
                .allowed_writes
                .compare_exchange(left, left - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, key: &str) -> WalletResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> WalletResult<()> {
        self.consume_write()?;
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> WalletResult<()> {
        self.consume_write()?;
        self.inner.delete(key).await
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> WalletResult<()> {
        self.consume_write()?;
        self.inner.write_batch(ops).await
    }

    async fn scan_prefix(&self, prefix: &str) -> WalletResult<Vec<(String, Vec<u8>)>> {
        self.inner.scan_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_bounded() {
        let store = MemoryStore::new();
        store.put("deposit:0xa", b"1".to_vec()).await.unwrap();
        store.put("deposit:0xb", b"2".to_vec()).await.unwrap();
        store.put("depositStartBlock:0xa", b"3".to_vec()).await.unwrap();
        store.put("withdrawal:w1", b"4".to_vec()).await.unwrap();

        let hits = store.scan_prefix("deposit:").await.unwrap();
        let keys: Vec<&str> = hits.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["deposit:0xa", "deposit:0xb"]);
    }

    #[tokio::test]
    async fn test_batch_applies_all_ops() {
        let store = MemoryStore::new();
        store.put("a", b"1".to_vec()).await.unwrap();
        store
            .write_batch(vec![
                BatchOp::Put {
                    key: "b".into(),
                    value: b"2".to_vec(),
                },
                BatchOp::Delete { key: "a".into() },
            ])
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_failing_store_crashes_once_then_recovers() {
        let store = FailingStore::new();
        store.put("a", b"1".to_vec()).await.unwrap();

        store.arm(0);
        let err = store
            .write_batch(vec![BatchOp::Put {
                key: "b".into(),
                value: b"2".to_vec(),
            }])
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "storage");
        // Nothing from the failed batch landed.
        assert_eq!(store.get("b").await.unwrap(), None);

        // After the "restart" writes work again.
        store.put("b", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), Some(b"2".to_vec()));
    }
}
