// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::WalletResult;
use crate::storage::{self, keys, KvStore};
use mind_wallet_types::Bucket;
use std::sync::Arc;

/// Time-windowed settlement slots, keyed `(chain, currency,
/// window_index)`.
#[derive(Clone)]
pub struct BucketStore {
    store: Arc<dyn KvStore>,
}

impl BucketStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(
        &self,
        chain: &str,
        currency: &str,
        window_index: u64,
    ) -> WalletResult<Option<Bucket>> {
        storage::get_json(
            self.store.as_ref(),
            &keys::bucket(chain, currency, window_index),
        )
        .await
    }

    pub async fn put(&self, bucket: &Bucket) -> WalletResult<()> {
        storage::put_json(
            self.store.as_ref(),
            &keys::bucket(&bucket.chain, &bucket.currency, bucket.window_index),
            bucket,
        )
        .await
    }

    pub async fn delete(&self, bucket: &Bucket) -> WalletResult<()> {
        self.store
            .delete(&keys::bucket(
                &bucket.chain,
                &bucket.currency,
                bucket.window_index,
            ))
            .await
    }

    /// Every stored bucket, for the startup scan of overdue windows.
    pub async fn list_all(&self) -> WalletResult<Vec<Bucket>> {
        let pairs = self.store.scan_prefix(keys::BUCKET_PREFIX).await?;
        let mut out = Vec::with_capacity(pairs.len());
        for (_, bytes) in pairs {
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn bucket(window_index: u64) -> Bucket {
        Bucket {
            id: Bucket::bucket_id("mind", "USDT", window_index),
            chain: "mind".into(),
            currency: "USDT".into(),
            window_index,
            withdrawal_ids: vec!["w1".into()],
            created_at_ms: window_index * 60_000,
            expires_at_ms: (window_index + 1) * 60_000,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let buckets = BucketStore::new(Arc::new(MemoryStore::new()));
        buckets.put(&bucket(7)).await.unwrap();
        let got = buckets.get("mind", "USDT", 7).await.unwrap().unwrap();
        assert_eq!(got.withdrawal_ids, vec!["w1".to_string()]);

        buckets.delete(&got).await.unwrap();
        assert!(buckets.get("mind", "USDT", 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_all() {
        let buckets = BucketStore::new(Arc::new(MemoryStore::new()));
        buckets.put(&bucket(7)).await.unwrap();
        buckets.put(&bucket(8)).await.unwrap();
        assert_eq!(buckets.list_all().await.unwrap().len(), 2);
    }
}
