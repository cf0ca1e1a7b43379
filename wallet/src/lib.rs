// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Custodial wallet back end for the Mind EVM chain family.
//!
//! The core is the value-movement pipeline: the deposit indexer
//! (observe, confirm, sweep, credit), the withdrawal batch processor
//! (freeze, bucket, settle) and the ledger that guards every balance
//! mutation. The HTTP surface, the embedded KV engine and secret
//! management are external collaborators behind the interfaces in
//! [`storage`], [`notify`] and [`crypto`].

pub mod abi;
pub mod accounts;
pub mod batch;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod metrics;
pub mod node;
pub mod notify;
pub mod storage;
pub mod stores;
pub mod utils;

pub use error::{WalletError, WalletResult};

/// Retry an RPC-shaped future with exponential backoff until it
/// succeeds or `max_elapsed_time` runs out.
#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // Delay sequence (secs, with jitter): 0.4, 0.8, 1.6, 3.2, ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(30),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                match $func.await {
                    Ok(value) => Ok(Ok(value)),
                    Err(e) => {
                        tracing::debug!("retrying after error: {:?}", e);
                        Err(backoff::Error::transient(e))
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
