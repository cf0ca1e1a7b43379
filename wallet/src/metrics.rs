// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, IntCounterVec,
    IntGaugeVec, Registry,
};

/// Pipeline health counters. Labelled by chain (and currency where the
/// pipeline is per-currency); error counters carry the stable
/// `error_type()` labels.
#[derive(Clone, Debug)]
pub struct WalletMetrics {
    pub deposits_admitted: IntCounterVec,
    pub deposits_credited: IntCounterVec,
    pub deposits_failed: IntCounterVec,
    pub withdrawals_requested: IntCounterVec,
    pub withdrawals_completed: IntCounterVec,
    pub withdrawals_failed: IntCounterVec,
    pub buckets_settled: IntCounterVec,
    pub chain_errors: IntCounterVec,
    pub last_processed_block: IntGaugeVec,
    pub pending_deposits: IntGaugeVec,
}

impl WalletMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            deposits_admitted: register_int_counter_vec_with_registry!(
                "wallet_deposits_admitted_total",
                "Deposits admitted to the pipeline",
                &["chain", "currency"],
                registry
            )
            .unwrap(),
            deposits_credited: register_int_counter_vec_with_registry!(
                "wallet_deposits_credited_total",
                "Deposits swept and credited to the ledger",
                &["chain", "currency"],
                registry
            )
            .unwrap(),
            deposits_failed: register_int_counter_vec_with_registry!(
                "wallet_deposits_failed_total",
                "Deposits that reached terminal failure",
                &["chain", "currency", "error_type"],
                registry
            )
            .unwrap(),
            withdrawals_requested: register_int_counter_vec_with_registry!(
                "wallet_withdrawals_requested_total",
                "Accepted withdrawal requests",
                &["chain", "currency"],
                registry
            )
            .unwrap(),
            withdrawals_completed: register_int_counter_vec_with_registry!(
                "wallet_withdrawals_completed_total",
                "Withdrawals settled on-chain",
                &["chain", "currency"],
                registry
            )
            .unwrap(),
            withdrawals_failed: register_int_counter_vec_with_registry!(
                "wallet_withdrawals_failed_total",
                "Withdrawals that reached terminal failure",
                &["chain", "currency", "error_type"],
                registry
            )
            .unwrap(),
            buckets_settled: register_int_counter_vec_with_registry!(
                "wallet_buckets_settled_total",
                "Bucket settlement attempts by outcome",
                &["chain", "currency", "outcome"],
                registry
            )
            .unwrap(),
            chain_errors: register_int_counter_vec_with_registry!(
                "wallet_chain_errors_total",
                "Chain adapter errors by type",
                &["chain", "error_type"],
                registry
            )
            .unwrap(),
            last_processed_block: register_int_gauge_vec_with_registry!(
                "wallet_last_processed_block",
                "Last ingested block per chain",
                &["chain"],
                registry
            )
            .unwrap(),
            pending_deposits: register_int_gauge_vec_with_registry!(
                "wallet_pending_deposits",
                "Deposits currently in a pending queue",
                &["chain", "currency"],
                registry
            )
            .unwrap(),
        }
    }

    pub fn new_for_test() -> Self {
        Self::new(&Registry::new())
    }
}
