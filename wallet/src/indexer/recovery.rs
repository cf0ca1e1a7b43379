// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Missed-block recovery and block cache hygiene.
//!
//! Recovery replays ingest for any block in the bounded look-back
//! window that has no cache entry; it never refetches a cached block,
//! so reconnect gaps heal without reprocessing. Cleanup evicts cache
//! entries whose TTL elapsed.

use super::{ingest_block, IndexerContext};
use crate::retry_with_max_elapsed_time;
use crate::utils::now_ms;
use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECOVERY_INTERVAL: Duration = Duration::from_secs(300);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const RECOVERY_RETRY_BUDGET: Duration = Duration::from_secs(30);

pub(crate) async fn run_block_recovery(ctx: Arc<IndexerContext>, cancel: CancellationToken) {
    let mut interval = time::interval(RECOVERY_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                if let Err(e) = recover_missed_blocks(&ctx).await {
                    warn!("[{}] block recovery failed: {}", ctx.chain, e);
                    ctx.metrics
                        .chain_errors
                        .with_label_values(&[&ctx.chain, e.error_type()])
                        .inc();
                }
            }
        }
    }
}

/// Replay `[max(last_processed − lookback, 0), head]`, ingesting only
/// blocks the cache has never seen.
pub(crate) async fn recover_missed_blocks(
    ctx: &IndexerContext,
) -> crate::error::WalletResult<()> {
    let retry_result: crate::error::WalletResult<crate::error::WalletResult<u64>> =
        retry_with_max_elapsed_time!(
            ctx.adapter.current_block_number(),
            RECOVERY_RETRY_BUDGET
        );
    let head = match retry_result {
        Ok(Ok(head)) => head,
        _ => {
            warn!("[{}] recovery could not read the chain head", ctx.chain);
            return Ok(());
        }
    };

    let last = ctx
        .progress
        .last_processed_block(&ctx.chain)
        .await?
        .unwrap_or(head);
    let start = last.saturating_sub(ctx.cfg.recovery_lookback_blocks);

    let mut recovered = 0usize;
    for number in start..=head {
        if ctx.blocks.has(&ctx.chain, number).await? {
            continue;
        }
        match ingest_block(ctx, number).await {
            Ok(()) => recovered += 1,
            Err(e) => {
                // Leave the gap for the next cycle rather than stalling
                // the whole range.
                debug!("[{}] recovery skipped block {}: {}", ctx.chain, number, e);
            }
        }
    }
    if recovered > 0 {
        info!(
            "[{}] recovery ingested {} missed blocks in [{}, {}]",
            ctx.chain, recovered, start, head
        );
    }
    Ok(())
}

pub(crate) async fn run_cache_cleanup(ctx: Arc<IndexerContext>, cancel: CancellationToken) {
    let mut interval = time::interval(CLEANUP_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                if let Err(e) = ctx.blocks.remove_expired(&ctx.chain, now_ms()).await {
                    warn!("[{}] cache cleanup failed: {}", ctx.chain, e);
                }
            }
        }
    }
}
