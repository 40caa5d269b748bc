use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapter::RecentTransferQuery;
use crate::context::ExecutionContext;
use crate::events::EngineEvent;
use crate::item::{ExecStatus, ItemKey};
use crate::session::{Session, MAX_RETRY_ROUNDS};

/// Recent-transfer checks in flight at once.
pub const VERIFY_CONCURRENCY: usize = 5;

pub const ALREADY_ON_CHAIN_MSG: &str = "matching on-chain transfer found, retry skipped";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    Skipped,
    Resubmit,
}

/// Per-item verdict of one verification round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryVerdict {
    pub key: ItemKey,
    pub recipient: String,
    pub action: RetryAction,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Items reset to Pending for another pass in the same session.
    Resubmit {
        round: u32,
        keys: Vec<ItemKey>,
        verdicts: Vec<RetryVerdict>,
    },
    /// Every candidate was already on chain; nothing to resubmit.
    Resolved { round: u32, verdicts: Vec<RetryVerdict> },
    /// The session used all of its rounds.
    Exhausted,
    Stopped,
}

/// Separates transfers that really failed from ones that landed but were
/// reported as failed, so a retry never pays twice.
pub struct RetryVerifier {
    ctx: Arc<ExecutionContext>,
}

impl RetryVerifier {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub async fn verify(&self, session: &mut Session, candidates: &[ItemKey]) -> RetryDecision {
        let Some(round) = session.next_round() else {
            warn!(
                "[RETRY] Reached the maximum of {} retry rounds, {} items left failed",
                MAX_RETRY_ROUNDS,
                candidates.len()
            );
            return RetryDecision::Exhausted;
        };

        info!(
            "[RETRY] Round {}/{}: checking {} failed transfers",
            round,
            MAX_RETRY_ROUNDS,
            candidates.len()
        );
        self.ctx.events.emit(EngineEvent::RetryRoundStarted {
            round,
            candidates: candidates.len(),
        });

        let since = session.start_timestamp();
        let mut verdicts = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(VERIFY_CONCURRENCY) {
            if self.ctx.control.is_stopped() {
                return RetryDecision::Stopped;
            }
            let checks = chunk.iter().map(|key| self.check_item(*key, since));
            verdicts.extend(join_all(checks).await.into_iter().flatten());
        }

        let mut resubmit = Vec::new();
        let mut skipped = 0;
        for verdict in &verdicts {
            match verdict.action {
                RetryAction::Skipped => {
                    if self.ctx.store.reclassify_success(verdict.key, ALREADY_ON_CHAIN_MSG).is_ok() {
                        self.ctx.events.emit(EngineEvent::ItemFinished {
                            key: verdict.key,
                            status: ExecStatus::Success,
                        });
                        skipped += 1;
                    }
                }
                RetryAction::Resubmit => {
                    let message = format!("waiting for retry ({}/{})", round, MAX_RETRY_ROUNDS);
                    if self.ctx.store.reset_for_retry(verdict.key, message).is_ok() {
                        resubmit.push(verdict.key);
                    }
                }
            }
        }

        info!(
            "[RETRY] Round {}: {} already on chain, {} queued for resubmission",
            round,
            skipped,
            resubmit.len()
        );
        self.ctx.events.emit(EngineEvent::RetryRoundVerified {
            round,
            skipped,
            resubmitted: resubmit.len(),
        });

        if resubmit.is_empty() {
            RetryDecision::Resolved { round, verdicts }
        } else {
            RetryDecision::Resubmit {
                round,
                keys: resubmit,
                verdicts,
            }
        }
    }

    async fn check_item(&self, key: ItemKey, since: i64) -> Option<RetryVerdict> {
        let item = self.ctx.store.get_by_key(key)?;
        if !item.is_retryable_failure() {
            return None;
        }

        let query = RecentTransferQuery {
            chain: self.ctx.config.chain.clone(),
            signer_address: item.address.clone(),
            signing_material: item.signing_material.clone(),
            recipient: self.ctx.strategy.normalize_recipient(&item.to_addr),
            since_timestamp: since,
            coin: self.ctx.config.coin.clone(),
            amount: self.ctx.resolver.expected_amount(&item),
        };

        let (action, reason) = match self.ctx.adapter.check_recent_transfer(&query).await {
            Ok(true) => (RetryAction::Skipped, "matching on-chain transfer found".to_string()),
            Ok(false) => (RetryAction::Resubmit, "no matching on-chain transfer".to_string()),
            Err(e) => {
                warn!("[RETRY] Chain check for {} failed, retrying conservatively: {}", key, e);
                (RetryAction::Resubmit, format!("check failed, retrying: {}", e))
            }
        };

        Some(RetryVerdict {
            key,
            recipient: item.to_addr,
            action,
            reason,
        })
    }
}
