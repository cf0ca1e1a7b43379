// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Withdrawal batching scenarios against the scripted chain adapter.

use super::*;
use crate::chain::mock::MockChainAdapter;
use crate::config::test_fixtures;
use crate::notify::{NotificationBus, SubscriptionFilter};
use crate::storage::MemoryStore;
use crate::stores::{BucketStore, WithdrawalStore};
use crate::utils::parse_address;
use ethers::utils::keccak256;
use mind_wallet_types::Balance;

struct TestEnv {
    processor: Arc<BatchProcessor>,
    adapter: Arc<MockChainAdapter>,
    ledger: Arc<Ledger>,
    bus: Arc<NotificationBus>,
    withdrawals: WithdrawalStore,
    buckets: BucketStore,
    hot: Address,
    token: Address,
    processor_contract: Address,
}

async fn env() -> TestEnv {
    let cfg = test_fixtures::chain_config();
    let secrets = test_fixtures::secrets();
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(NotificationBus::new());
    let ledger = Arc::new(Ledger::new(store.clone(), bus.clone()));
    let adapter = Arc::new(MockChainAdapter::new("mind"));
    let withdrawals = WithdrawalStore::new(store.clone());
    let buckets = BucketStore::new(store.clone());
    let hot_wallet = secrets.hot_wallet().unwrap();
    let hot = hot_wallet.address();
    let token = parse_address("0x00000000000000000000000000000000000000aa").unwrap();
    let processor_contract =
        parse_address("0x00000000000000000000000000000000000000bb").unwrap();

    let processor = BatchProcessor::new(
        "mind".into(),
        cfg,
        adapter.clone(),
        ledger.clone(),
        withdrawals.clone(),
        buckets.clone(),
        bus.clone(),
        hot_wallet,
        Arc::new(Mutex::new(())),
        Arc::new(crate::metrics::WalletMetrics::new_for_test()),
        CancellationToken::new(),
    );

    TestEnv {
        processor,
        adapter,
        ledger,
        bus,
        withdrawals,
        buckets,
        hot,
        token,
        processor_contract,
    }
}

fn amt(s: &str) -> Amount {
    s.parse().unwrap()
}

async fn balance(env: &TestEnv, username: &str, currency: &str) -> Balance {
    env.ledger.get(username, "mind", currency).await.unwrap()
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// S4: a token withdrawal freezes amount + fee, lands in the current
/// bucket, and one `processBatchErc20` call settles it.
#[tokio::test]
async fn test_token_withdrawal_batched_and_settled() {
    let env = env().await;
    env.ledger
        .credit("bob", "mind", "USDT", amt("100.00"))
        .await
        .unwrap();

    let withdrawal = env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "USDT",
            amt("50.00"),
            "0x00000000000000000000000000000000000000dd",
        )
        .await
        .unwrap();

    assert_eq!(withdrawal.status, WithdrawalStatus::AddedToBucket);
    let bucket_id = withdrawal.bucket_id.clone().unwrap();
    let window_index: u64 = bucket_id.rsplit(':').next().unwrap().parse().unwrap();

    // Fee 1.00 on top of the 50.00: reserved 51.00.
    let before = balance(&env, "bob", "USDT").await;
    assert_eq!(before.available, amt("49.00"));
    assert_eq!(before.frozen, amt("51.00"));

    let bucket = env
        .buckets
        .get("mind", "USDT", window_index)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bucket.withdrawal_ids, vec![withdrawal.id.clone()]);

    // Hot wallet holds enough and is already approved.
    env.adapter
        .set_token_balance(env.token, env.hot, U256::from(50_000_000u64));
    env.adapter.set_allowance(
        env.token,
        env.hot,
        env.processor_contract,
        U256::from(50_000_000u64),
    );

    env.processor.settle_bucket("USDT", window_index).await;

    // One settlement transaction: processBatchErc20 on the processor.
    let submitted = env.adapter.submitted();
    assert_eq!(submitted.len(), 1);
    let batch = &submitted[0];
    assert_eq!(batch.to, Some(env.processor_contract));
    assert_eq!(
        batch.data[..4],
        selector("processBatchErc20(address,address[],uint256[])")
    );
    assert_eq!(batch.value, U256::zero());

    let after = balance(&env, "bob", "USDT").await;
    assert_eq!(after.available, amt("49.00"));
    assert_eq!(after.frozen, Amount::ZERO);

    let settled = env.withdrawals.get(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(settled.status, WithdrawalStatus::Completed);
    assert_eq!(
        settled.tx_hash.as_deref(),
        Some(crate::utils::normalize_hash(&batch.hash).as_str())
    );

    // The bucket id is retired.
    assert!(env
        .buckets
        .get("mind", "USDT", window_index)
        .await
        .unwrap()
        .is_none());
}

/// A missing allowance triggers an `approve` before the batch call.
#[tokio::test]
async fn test_settlement_approves_when_allowance_short() {
    let env = env().await;
    env.ledger
        .credit("bob", "mind", "USDT", amt("100.00"))
        .await
        .unwrap();
    let withdrawal = env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "USDT",
            amt("50.00"),
            "0x00000000000000000000000000000000000000dd",
        )
        .await
        .unwrap();
    let window_index: u64 = withdrawal
        .bucket_id
        .unwrap()
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    env.adapter
        .set_token_balance(env.token, env.hot, U256::from(50_000_000u64));
    // Allowance left at zero.

    env.processor.settle_bucket("USDT", window_index).await;

    let submitted = env.adapter.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].to, Some(env.token));
    assert_eq!(submitted[0].data[..4], selector("approve(address,uint256)"));
    assert_eq!(submitted[1].to, Some(env.processor_contract));
}

/// S4 native flavour: `processBatchNative` carries the bucket total as
/// its transaction value.
#[tokio::test]
async fn test_native_withdrawals_share_one_batch() {
    let env = env().await;
    env.ledger
        .credit("alice", "mind", "MIND", amt("30.00"))
        .await
        .unwrap();
    env.ledger
        .credit("bob", "mind", "MIND", amt("20.00"))
        .await
        .unwrap();

    let w1 = env
        .processor
        .clone()
        .request_withdrawal(
            "alice",
            "MIND",
            amt("10.00"),
            "0x00000000000000000000000000000000000000d1",
        )
        .await
        .unwrap();
    let w2 = env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "MIND",
            amt("5.00"),
            "0x00000000000000000000000000000000000000d2",
        )
        .await
        .unwrap();
    // Same window, same bucket.
    assert_eq!(w1.bucket_id, w2.bucket_id);
    let window_index: u64 = w1
        .bucket_id
        .unwrap()
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    // 15 MIND total on-chain (fees stay in custody).
    let total = U256::exp10(18) * U256::from(15u64);
    env.adapter.set_native_balance(env.hot, total);

    env.processor.settle_bucket("MIND", window_index).await;

    let submitted = env.adapter.submitted();
    assert_eq!(submitted.len(), 1);
    let batch = &submitted[0];
    assert_eq!(
        batch.data[..4],
        selector("processBatchNative(address[],uint256[])")
    );
    assert_eq!(batch.value, total);

    // Reservations settled: frozen gone, fees deducted.
    let alice = balance(&env, "alice", "MIND").await;
    assert_eq!(alice.available, amt("19.50"));
    assert_eq!(alice.frozen, Amount::ZERO);
    let bob = balance(&env, "bob", "MIND").await;
    assert_eq!(bob.available, amt("14.50"));
    assert_eq!(bob.frozen, Amount::ZERO);
}

/// S5: a dry hot wallet fails the bucket without touching the chain
/// and restores every reservation exactly once.
#[tokio::test]
async fn test_insufficient_hot_wallet_liquidity_fails_bucket() {
    let env = env().await;
    env.ledger
        .credit("bob", "mind", "USDT", amt("100.00"))
        .await
        .unwrap();

    let mut notifications = env
        .bus
        .subscribe(SubscriptionFilter::for_username("bob"))
        .await;

    let withdrawal = env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "USDT",
            amt("50.00"),
            "0x00000000000000000000000000000000000000dd",
        )
        .await
        .unwrap();
    let window_index: u64 = withdrawal
        .bucket_id
        .clone()
        .unwrap()
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    // Hot wallet short: 10 USDT against a 50 USDT bucket.
    env.adapter
        .set_token_balance(env.token, env.hot, U256::from(10_000_000u64));

    env.processor.settle_bucket("USDT", window_index).await;

    // No transaction was sent.
    assert!(env.adapter.submitted().is_empty());

    let failed = env.withdrawals.get(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);

    // Reservation restored exactly once.
    let after = balance(&env, "bob", "USDT").await;
    assert_eq!(after.available, amt("100.00"));
    assert_eq!(after.frozen, Amount::ZERO);

    // Settling again is a no-op: bucket retired, withdrawal terminal.
    env.processor.settle_bucket("USDT", window_index).await;
    let after = balance(&env, "bob", "USDT").await;
    assert_eq!(after.available, amt("100.00"));

    let mut saw_failed = false;
    while let Ok(event) = notifications.try_recv() {
        if let WalletEvent::WithdrawalUpdate { withdrawal } = event {
            saw_failed |= withdrawal.status == WithdrawalStatus::Failed;
        }
    }
    assert!(saw_failed);
}

/// Property 4 under revert: a reverted batch unfreezes, and replays
/// cannot unfreeze twice.
#[tokio::test]
async fn test_reverted_batch_unfreezes_once() {
    let env = env().await;
    env.ledger
        .credit("bob", "mind", "MIND", amt("20.00"))
        .await
        .unwrap();
    let withdrawal = env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "MIND",
            amt("10.00"),
            "0x00000000000000000000000000000000000000dd",
        )
        .await
        .unwrap();
    let window_index: u64 = withdrawal
        .bucket_id
        .unwrap()
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    env.adapter
        .set_native_balance(env.hot, U256::exp10(18) * U256::from(10u64));
    // The next submitted hash is deterministic in the mock; fail it.
    // Easier: submit, then flip the recorded hash to reverted before
    // the receipt wait would matter - instead we pre-mark the first
    // generated hash.
    env.adapter.set_receipt_outcome(
        ethers::types::H256::from_low_u64_be(0x5eed_0000_0000),
        crate::chain::ReceiptOutcome::Reverted {
            tx_hash: ethers::types::H256::from_low_u64_be(0x5eed_0000_0000),
        },
    );

    env.processor.settle_bucket("MIND", window_index).await;

    let after = balance(&env, "bob", "MIND").await;
    assert_eq!(after.available, amt("20.00"));
    assert_eq!(after.frozen, Amount::ZERO);

    let failed = env.withdrawals.get(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);

    // Replay: nothing to settle, nothing moves.
    env.processor.settle_bucket("MIND", window_index).await;
    let after = balance(&env, "bob", "MIND").await;
    assert_eq!(after.available, amt("20.00"));
}

/// Request validation: limits and funds are checked before anything
/// is recorded.
#[tokio::test]
async fn test_request_validation() {
    let env = env().await;
    env.ledger
        .credit("bob", "mind", "USDT", amt("100.00"))
        .await
        .unwrap();

    // Below the 10.00 minimum.
    let err = env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "USDT",
            amt("5.00"),
            "0x00000000000000000000000000000000000000dd",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));

    // More than available once the fee lands: 100.00 requested needs
    // 101.00 reserved.
    let err = env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "USDT",
            amt("100.00"),
            "0x00000000000000000000000000000000000000dd",
        )
        .await
        .unwrap_err();
    assert_eq!(err, WalletError::InsufficientAvailable);

    // Nothing leaked into the store or the ledger.
    assert!(env.withdrawals.list_non_terminal().await.unwrap().is_empty());
    let after = balance(&env, "bob", "USDT").await;
    assert_eq!(after.available, amt("100.00"));
    assert_eq!(after.frozen, Amount::ZERO);

    // Unknown currency.
    assert!(env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "DOGE",
            amt("10.00"),
            "0x00000000000000000000000000000000000000dd"
        )
        .await
        .is_err());
}

/// Overdue buckets from a previous run settle at startup.
#[tokio::test]
async fn test_recover_buckets_settles_overdue_window() {
    let env = env().await;
    env.ledger
        .credit("bob", "mind", "USDT", amt("100.00"))
        .await
        .unwrap();
    let withdrawal = env
        .processor
        .clone()
        .request_withdrawal(
            "bob",
            "USDT",
            amt("50.00"),
            "0x00000000000000000000000000000000000000dd",
        )
        .await
        .unwrap();
    let window_index: u64 = withdrawal
        .bucket_id
        .unwrap()
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    // Make the stored bucket look overdue, as after a restart.
    let mut bucket = env
        .buckets
        .get("mind", "USDT", window_index)
        .await
        .unwrap()
        .unwrap();
    bucket.expires_at_ms = 1;
    env.buckets.put(&bucket).await.unwrap();

    env.adapter
        .set_token_balance(env.token, env.hot, U256::from(50_000_000u64));
    env.adapter.set_allowance(
        env.token,
        env.hot,
        env.processor_contract,
        U256::from(50_000_000u64),
    );

    env.processor.clone().recover_buckets().await.unwrap();
    // The settlement runs on a spawned task; give it a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let settled = env.withdrawals.get(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(settled.status, WithdrawalStatus::Completed);
    assert_eq!(balance(&env, "bob", "USDT").await.frozen, Amount::ZERO);
}
