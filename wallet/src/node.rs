// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node wiring.
//!
//! Builds the store, ledger, bus, one adapter/indexer/batcher per
//! configured chain, and the wallet service facade on top. Startup
//! recovery happens here: active addresses reload from persisted
//! accounts, pending deposit queues rebuild inside the indexers, and
//! overdue buckets settle immediately.

use crate::accounts::WalletService;
use crate::batch::BatchProcessor;
use crate::chain::eth::EthChainAdapter;
use crate::chain::ChainAdapter;
use crate::config::NodeConfig;
use crate::crypto::wallet_address;
use crate::indexer::{ActiveAddresses, ChainIndexer, IndexerContext};
use crate::ledger::Ledger;
use crate::metrics::WalletMetrics;
use crate::notify::NotificationBus;
use crate::storage::{KvStore, MemoryStore};
use crate::stores::{
    AccountStore, BlockCacheStore, BucketStore, DepositStore, GasFundingStore, ProgressStore,
    WithdrawalStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Node {
    pub service: Arc<WalletService>,
    pub bus: Arc<NotificationBus>,
    cancel: CancellationToken,
    indexers: Vec<ChainIndexer>,
    batchers: HashMap<String, Arc<BatchProcessor>>,
}

impl Node {
    /// Validate configuration, connect every chain and spawn the task
    /// set. Fails fast on configuration errors (bad keys, chain id
    /// mismatch).
    pub async fn start(config: NodeConfig) -> anyhow::Result<Node> {
        config.validate()?;

        // The embedded KV engine is an external collaborator; this is
        // its single binding site.
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(NotificationBus::new());
        let ledger = Arc::new(Ledger::new(store.clone(), bus.clone()));
        let metrics = Arc::new(WalletMetrics::new(prometheus::default_registry()));

        let accounts = AccountStore::new(store.clone());
        let active = Arc::new(ActiveAddresses::new());
        active.load_from(&accounts).await?;
        info!("tracking {} deposit addresses", active.len());

        let cipher = config.secrets.cipher()?;
        let hot_wallet = config.secrets.hot_wallet()?;
        let hot_address = wallet_address(&hot_wallet);

        let cancel = CancellationToken::new();
        let mut indexers = Vec::new();
        let mut batchers = HashMap::new();

        for (chain, chain_cfg) in &config.chains {
            let adapter: Arc<dyn ChainAdapter> = Arc::new(
                EthChainAdapter::connect(
                    chain.clone(),
                    chain_cfg.rpc_url.clone(),
                    &chain_cfg.http_rpc_url,
                    chain_cfg.chain_id,
                    Duration::from_millis(chain_cfg.poll_interval_ms),
                    cancel.clone(),
                )
                .await?,
            );
            let submission_lane = Arc::new(Mutex::new(()));

            let indexer = ChainIndexer::start(
                IndexerContext {
                    chain: chain.clone(),
                    cfg: chain_cfg.clone(),
                    adapter: adapter.clone(),
                    ledger: ledger.clone(),
                    deposits: DepositStore::new(store.clone()),
                    blocks: BlockCacheStore::new(store.clone()),
                    progress: ProgressStore::new(store.clone()),
                    gas_funding: GasFundingStore::new(store.clone()),
                    accounts: AccountStore::new(store.clone()),
                    bus: bus.clone(),
                    active: active.clone(),
                    cipher: cipher.clone(),
                    hot_wallet: hot_wallet.clone(),
                    hot_address: hot_address.clone(),
                    submission_lane: submission_lane.clone(),
                    metrics: metrics.clone(),
                },
                cancel.clone(),
            )
            .await?;
            indexers.push(indexer);

            let batcher = BatchProcessor::new(
                chain.clone(),
                chain_cfg.clone(),
                adapter,
                ledger.clone(),
                WithdrawalStore::new(store.clone()),
                BucketStore::new(store.clone()),
                bus.clone(),
                hot_wallet.clone(),
                submission_lane,
                metrics.clone(),
                cancel.clone(),
            );
            batcher.clone().recover_buckets().await?;
            batchers.insert(chain.clone(), batcher);
        }

        let service = Arc::new(WalletService::new(
            accounts,
            ledger,
            bus.clone(),
            cipher,
            config.secrets.account_key_pepper.clone(),
            active,
            batchers.clone(),
        ));

        info!("node started with {} chains", config.chains.len());
        Ok(Node {
            service,
            bus,
            cancel,
            indexers,
            batchers,
        })
    }

    /// Graceful shutdown: stop accepting first, drain in-flight
    /// settlements, then stop the indexer tasks.
    pub async fn shutdown(self) {
        info!("shutting down");
        for batcher in self.batchers.values() {
            batcher.shutdown().await;
        }
        self.cancel.cancel();
        for indexer in self.indexers {
            indexer.join().await;
        }
        info!("shutdown complete");
    }
}
