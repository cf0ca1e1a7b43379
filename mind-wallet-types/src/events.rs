// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Outbound state-change events.
//!
//! The notification bus publishes these to external subscribers (the
//! push channel of the API layer). The schema is stable: each variant
//! tags itself with its `type` and carries the full current record.

use crate::amount::Amount;
use crate::records::{Balance, Deposit, Withdrawal};
use serde::{Deserialize, Serialize};

/// Event discriminator used by subscriber filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DepositUpdate,
    WithdrawalUpdate,
    BalanceUpdate,
    TransferUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletEvent {
    DepositUpdate {
        deposit: Deposit,
    },
    WithdrawalUpdate {
        withdrawal: Withdrawal,
    },
    BalanceUpdate {
        username: String,
        chain: String,
        currency: String,
        balance: Balance,
    },
    /// Internal transfer between two users; delivered to subscribers of
    /// both sides.
    TransferUpdate {
        from_username: String,
        to_username: String,
        chain: String,
        currency: String,
        amount: Amount,
        timestamp_ms: u64,
    },
}

impl WalletEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WalletEvent::DepositUpdate { .. } => EventKind::DepositUpdate,
            WalletEvent::WithdrawalUpdate { .. } => EventKind::WithdrawalUpdate,
            WalletEvent::BalanceUpdate { .. } => EventKind::BalanceUpdate,
            WalletEvent::TransferUpdate { .. } => EventKind::TransferUpdate,
        }
    }

    /// Usernames this event concerns. Transfers concern both parties.
    pub fn usernames(&self) -> Vec<&str> {
        match self {
            WalletEvent::DepositUpdate { deposit } => vec![&deposit.username],
            WalletEvent::WithdrawalUpdate { withdrawal } => vec![&withdrawal.username],
            WalletEvent::BalanceUpdate { username, .. } => vec![username],
            WalletEvent::TransferUpdate {
                from_username,
                to_username,
                ..
            } => vec![from_username, to_username],
        }
    }

    pub fn chain(&self) -> &str {
        match self {
            WalletEvent::DepositUpdate { deposit } => &deposit.chain,
            WalletEvent::WithdrawalUpdate { withdrawal } => &withdrawal.chain,
            WalletEvent::BalanceUpdate { chain, .. } => chain,
            WalletEvent::TransferUpdate { chain, .. } => chain,
        }
    }

    pub fn currency(&self) -> &str {
        match self {
            WalletEvent::DepositUpdate { deposit } => &deposit.currency,
            WalletEvent::WithdrawalUpdate { withdrawal } => &withdrawal.currency,
            WalletEvent::BalanceUpdate { currency, .. } => currency,
            WalletEvent::TransferUpdate { currency, .. } => currency,
        }
    }

    /// Status label for filter matching; `None` for events without a
    /// lifecycle status.
    pub fn status(&self) -> Option<&'static str> {
        match self {
            WalletEvent::DepositUpdate { deposit } => Some(deposit.status.as_str()),
            WalletEvent::WithdrawalUpdate { withdrawal } => Some(withdrawal.status.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DepositStatus, WithdrawalStatus};

    fn deposit() -> Deposit {
        Deposit {
            tx_hash: "0xt1".into(),
            username: "alice".into(),
            chain: "mind".into(),
            currency: "MIND".into(),
            amount: "5.00".parse().unwrap(),
            from_address: "0xb".into(),
            to_address: "0xa".into(),
            required_confirmations: 10,
            confirmations: 10,
            status: DepositStatus::Credited,
            retries: 0,
            created_at_ms: 1,
            failure: None,
        }
    }

    #[test]
    fn test_event_type_tag() {
        let ev = WalletEvent::DepositUpdate { deposit: deposit() };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"deposit_update\""));
        assert_eq!(ev.kind(), EventKind::DepositUpdate);
        assert_eq!(ev.status(), Some("credited"));
    }

    #[test]
    fn test_transfer_concerns_both_parties() {
        let ev = WalletEvent::TransferUpdate {
            from_username: "alice".into(),
            to_username: "bob".into(),
            chain: "mind".into(),
            currency: "MIND".into(),
            amount: "1.00".parse().unwrap(),
            timestamp_ms: 42,
        };
        assert_eq!(ev.usernames(), vec!["alice", "bob"]);
        assert!(ev.status().is_none());
    }

    #[test]
    fn test_withdrawal_event_carries_full_record() {
        let w = Withdrawal {
            id: "w1".into(),
            username: "bob".into(),
            chain: "mind".into(),
            currency: "USDT".into(),
            amount: "50.00".parse().unwrap(),
            fee: "1.00".parse().unwrap(),
            to_address: "0xdead".into(),
            bucket_id: Some("mind:USDT:7".into()),
            tx_hash: None,
            status: WithdrawalStatus::AddedToBucket,
            created_at_ms: 9,
        };
        let ev = WalletEvent::WithdrawalUpdate { withdrawal: w };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"added_to_bucket\""));
        assert!(json.contains("mind:USDT:7"));
    }
}
