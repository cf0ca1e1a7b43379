// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide publish-only notification bus.
//!
//! Components publish [`WalletEvent`]s after every committed state
//! change; subscribers register a filter and get best-effort delivery
//! on a bounded channel. There is no backlog: a slow subscriber loses
//! events rather than stalling the pipeline.

use mind_wallet_types::{EventKind, WalletEvent};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

const SUBSCRIBER_CHANNEL_SIZE: usize = 256;

/// Subscriber-declared interest. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub username: Option<String>,
    pub kinds: Option<HashSet<EventKind>>,
    pub chain: Option<String>,
    pub currency: Option<String>,
    pub status: Option<String>,
}

impl SubscriptionFilter {
    pub fn for_username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &WalletEvent) -> bool {
        if let Some(username) = &self.username {
            // Transfer events concern both parties.
            if !event.usernames().contains(&username.as_str()) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(chain) = &self.chain {
            if event.chain() != chain {
                return false;
            }
        }
        if let Some(currency) = &self.currency {
            if event.currency() != currency {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if event.status() != Some(status.as_str()) {
                return false;
            }
        }
        true
    }
}

struct Subscriber {
    id: u64,
    filter: SubscriptionFilter,
    tx: mpsc::Sender<WalletEvent>,
}

#[derive(Default)]
pub struct NotificationBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter; the returned receiver sees every matching
    /// event published after this call.
    pub async fn subscribe(&self, filter: SubscriptionFilter) -> mpsc::Receiver<WalletEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .await
            .push(Subscriber { id, filter, tx });
        rx
    }

    /// Best-effort fan-out. Full or closed subscriber channels drop the
    /// event; closed subscribers are pruned.
    pub async fn publish(&self, event: WalletEvent) {
        let mut closed: Vec<u64> = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for sub in subscribers.iter() {
                if !sub.filter.matches(&event) {
                    continue;
                }
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("notification dropped for slow subscriber {}", sub.id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(sub.id),
                }
            }
        }
        if !closed.is_empty() {
            self.subscribers
                .write()
                .await
                .retain(|s| !closed.contains(&s.id));
        }
    }
}
