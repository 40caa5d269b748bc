use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapter::ChainAdapter;
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::control::ExecutionControl;
use crate::error::Result;
use crate::events::EventSink;
use crate::item::ItemKey;
use crate::progress::Progress;
use crate::retry::{RetryDecision, RetryVerifier};
use crate::scheduler::{PassOutcome, Scheduler};
use crate::session::Session;
use crate::store::TransferStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    /// Finished, but some items are still Failed after the retry budget.
    CompletedWithFailures,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub pending: usize,
    pub retry_rounds: u32,
    pub started_at: DateTime<Utc>,
}

/// Entry point: one `execute` call is one session.
///
/// The engine owns a single [`ExecutionControl`]. Once stopped (by the caller
/// or by the fee-ceiling signal) it stays stopped; build a new engine for the
/// next session.
pub struct BatchEngine {
    config: EngineConfig,
    store: Arc<TransferStore>,
    adapter: Arc<dyn ChainAdapter>,
    control: ExecutionControl,
    events: EventSink,
}

impl BatchEngine {
    pub fn new(config: EngineConfig, store: Arc<TransferStore>, adapter: Arc<dyn ChainAdapter>) -> Self {
        Self {
            config,
            store,
            adapter,
            control: ExecutionControl::new(),
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TransferStore> {
        &self.store
    }

    /// Handle for stopping the run from another task.
    pub fn control(&self) -> ExecutionControl {
        self.control.clone()
    }

    /// Runs `keys` to completion: one pass, then bounded retry rounds for
    /// items that failed retryably and have no matching on-chain transfer.
    pub async fn execute(&self, keys: &[ItemKey]) -> Result<SessionReport> {
        self.config.validate()?;

        let mut session = Session::start();
        let ctx = Arc::new(ExecutionContext::new(
            self.config.clone(),
            self.store.clone(),
            self.adapter.clone(),
            self.control.clone(),
            self.events.clone(),
        ));
        let scheduler = Scheduler::new(ctx.clone());
        let verifier = RetryVerifier::new(ctx.clone());

        info!(
            "[ENGINE] Session started at {} with {} items ({:?})",
            session.started_at(),
            keys.len(),
            scheduler.mode()
        );

        let mut pass = scheduler.run_pass(keys).await?;
        while pass == PassOutcome::Completed && self.config.error_retry && !self.control.is_stopped() {
            let candidates = self.store.retryable_failures(keys);
            if candidates.is_empty() {
                break;
            }
            match verifier.verify(&mut session, &candidates).await {
                RetryDecision::Resubmit { keys: resubmit, .. } => {
                    pass = scheduler.run_pass(&resubmit).await?;
                }
                RetryDecision::Resolved { .. } => break,
                RetryDecision::Exhausted => {
                    warn!("[ENGINE] Retry budget used up with {} items failing", candidates.len());
                    break;
                }
                RetryDecision::Stopped => {
                    pass = PassOutcome::Stopped;
                }
            }
        }

        let progress = Progress::snapshot(&self.store, keys);
        let outcome = if pass == PassOutcome::Stopped || self.control.is_stopped() {
            SessionOutcome::Stopped
        } else if progress.failed > 0 || !progress.is_finished() {
            SessionOutcome::CompletedWithFailures
        } else {
            SessionOutcome::Completed
        };

        let report = SessionReport {
            outcome,
            total: progress.total,
            success: progress.success,
            failed: progress.failed,
            pending: progress.pending,
            retry_rounds: session.retry_round(),
            started_at: session.started_at(),
        };
        info!(
            "[ENGINE] Session finished: {:?}, {} succeeded, {} failed, {} retry rounds",
            report.outcome, report.success, report.failed, report.retry_rounds
        );
        Ok(report)
    }
}
