// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared value types for the Mind custodial wallet back end.
//!
//! Everything that crosses a component boundary lives here: the
//! two-decimal fixed-point [`Amount`], the persisted record types with
//! their state machines, and the outbound notification events.

pub mod amount;
pub mod events;
pub mod records;

pub use amount::{Amount, AmountError};
pub use events::{EventKind, WalletEvent};
pub use records::{
    Account, Balance, Bucket, CachedBlock, CachedTransaction, Deposit, DepositStatus, Withdrawal,
    WithdrawalStatus,
};
