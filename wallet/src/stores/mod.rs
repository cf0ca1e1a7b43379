// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed views over the key/value store, one per record family.
//!
//! The stores own key layout and state-machine enforcement; truth is
//! always in the store, in-process sets are soft caches over it.

mod account;
mod block_cache;
mod bucket;
mod deposit;
mod meta;
mod withdrawal;

pub use account::AccountStore;
pub use block_cache::BlockCacheStore;
pub use bucket::BucketStore;
pub use deposit::DepositStore;
pub use meta::{GasFundingStore, ProgressStore};
pub use withdrawal::WithdrawalStore;
