// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::WalletResult;
use crate::storage::{self, keys, KvStore};
use mind_wallet_types::CachedBlock;
use std::sync::Arc;
use tracing::debug;

/// Fetched blocks held until they are deep enough to scan. The TTL
/// must exceed `required_confirmations × block_time` by a safety
/// factor; the node config validates that.
#[derive(Clone)]
pub struct BlockCacheStore {
    store: Arc<dyn KvStore>,
}

impl BlockCacheStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, chain: &str, number: u64) -> WalletResult<Option<CachedBlock>> {
        storage::get_json(self.store.as_ref(), &keys::block_cache(chain, number)).await
    }

    pub async fn has(&self, chain: &str, number: u64) -> WalletResult<bool> {
        Ok(self
            .store
            .get(&keys::block_cache(chain, number))
            .await?
            .is_some())
    }

    pub async fn put(&self, block: &CachedBlock) -> WalletResult<()> {
        storage::put_json(
            self.store.as_ref(),
            &keys::block_cache(&block.chain, block.number),
            block,
        )
        .await
    }

    /// All cached blocks for one chain, block-number ascending by key
    /// order is not guaranteed (keys sort lexicographically), so the
    /// caller sorts when it matters.
    pub async fn list_chain(&self, chain: &str) -> WalletResult<Vec<CachedBlock>> {
        let prefix = format!("{}{}:", keys::BLOCK_CACHE_PREFIX, chain);
        let pairs = self.store.scan_prefix(&prefix).await?;
        let mut out = Vec::with_capacity(pairs.len());
        for (_, bytes) in pairs {
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Drop entries whose TTL elapsed. Returns how many were removed.
    pub async fn remove_expired(&self, chain: &str, now_ms: u64) -> WalletResult<usize> {
        let blocks = self.list_chain(chain).await?;
        let mut removed = 0;
        for block in blocks {
            if block.is_expired(now_ms) {
                self.store
                    .delete(&keys::block_cache(&block.chain, block.number))
                    .await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("[{}] evicted {} expired cached blocks", chain, removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn block(number: u64, cached_at_ms: u64) -> CachedBlock {
        CachedBlock {
            chain: "mind".into(),
            number,
            hash: format!("0x{:x}", number),
            transactions: vec![],
            cached_at_ms,
            ttl_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_put_get_has() {
        let cache = BlockCacheStore::new(Arc::new(MemoryStore::new()));
        cache.put(&block(100, 0)).await.unwrap();
        assert!(cache.has("mind", 100).await.unwrap());
        assert!(!cache.has("mind", 101).await.unwrap());
        assert_eq!(cache.get("mind", 100).await.unwrap().unwrap().number, 100);
    }

    #[tokio::test]
    async fn test_remove_expired_keeps_fresh() {
        let cache = BlockCacheStore::new(Arc::new(MemoryStore::new()));
        cache.put(&block(100, 0)).await.unwrap();
        cache.put(&block(101, 5_000)).await.unwrap();

        let removed = cache.remove_expired("mind", 5_500).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!cache.has("mind", 100).await.unwrap());
        assert!(cache.has("mind", 101).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_chain_is_chain_scoped() {
        let cache = BlockCacheStore::new(Arc::new(MemoryStore::new()));
        cache.put(&block(100, 0)).await.unwrap();
        let mut other = block(200, 0);
        other.chain = "mindtest".into();
        cache.put(&other).await.unwrap();

        let blocks = cache.list_chain("mind").await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].number, 100);
    }
}
