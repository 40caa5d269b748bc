use futures::future::join_all;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::adapter::TransferRequest;
use crate::amount::Resolution;
use crate::confirm::{short_hash, ConfirmationPoller, PendingConfirmation, PendingSet};
use crate::context::ExecutionContext;
use crate::error::{EngineError, ItemFailure, Result};
use crate::events::{EngineEvent, ExecutionMode};
use crate::fee_gate::GateOutcome;
use crate::item::{ExecStatus, ItemKey};
use crate::store::TransferStore;

pub const SKIPPED_WITHIN_RANGE_MSG: &str = "balance already within retention range";
const SUBMITTING_MSG: &str = "submitting transaction...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Stopped,
}

/// Items sharing one signer, in import order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletGroup {
    pub signer: String,
    pub keys: Vec<ItemKey>,
}

/// Groups `keys` by signer. Groups keep the order in which their signer
/// first appears.
pub fn build_wallet_groups(store: &TransferStore, keys: &[ItemKey]) -> Vec<WalletGroup> {
    let mut groups: Vec<WalletGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for key in keys {
        let Some(item) = store.get_by_key(*key) else {
            continue;
        };
        let signer = item.signer_id().to_string();
        match index.get(&signer) {
            Some(&i) => groups[i].keys.push(*key),
            None => {
                index.insert(signer.clone(), groups.len());
                groups.push(WalletGroup {
                    signer,
                    keys: vec![*key],
                });
            }
        }
    }
    groups
}

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemStep {
    /// Reached a terminal status after an adapter call.
    Finished,
    /// Fast mode: broadcast accepted, confirmation pending.
    Submitted,
    /// Terminal without an adapter call.
    NoOp,
    /// Was not Pending when dequeued.
    NotPending,
    Stopped,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Drained,
    Stopped,
    Fatal,
}

/// Runs Pending items to a terminal status with bounded concurrency.
pub struct Scheduler {
    ctx: Arc<ExecutionContext>,
}

impl Scheduler {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub fn mode(&self) -> ExecutionMode {
        ExecutionMode::for_config(&self.ctx.config)
    }

    /// One pass over `keys`. Returns once every Pending item is terminal, or
    /// a stop was observed. The fee-ceiling signal aborts with an error.
    pub async fn run_pass(&self, keys: &[ItemKey]) -> Result<PassOutcome> {
        let keys: Vec<ItemKey> = keys
            .iter()
            .copied()
            .filter(|key| self.ctx.store.status_of(*key) == Some(ExecStatus::Pending))
            .collect();
        if keys.is_empty() {
            return Ok(PassOutcome::Completed);
        }

        if self.ctx.resolver.strategy().needs_balance() && self.ctx.strategy.prefetch_balances() {
            self.ctx.prefetch_balances(&keys).await;
        }

        match self.mode() {
            ExecutionMode::Sequential => self.run_sequential(&keys).await,
            ExecutionMode::MultiWorker => self.run_multi_worker(&keys).await,
            ExecutionMode::Fast => self.run_fast(&keys).await,
        }
    }

    async fn run_sequential(&self, keys: &[ItemKey]) -> Result<PassOutcome> {
        info!("[SCHEDULER] Sequential pass over {} items", keys.len());
        self.ctx.events.emit(EngineEvent::PassStarted {
            mode: ExecutionMode::Sequential,
            items: keys.len(),
            workers: 1,
        });

        for (index, key) in keys.iter().enumerate() {
            if self.ctx.control.is_stopped() {
                return Ok(PassOutcome::Stopped);
            }

            match self.process_item(*key, None).await {
                ItemStep::Fatal => return Err(EngineError::FeeCeilingExceeded),
                ItemStep::Stopped => return Ok(PassOutcome::Stopped),
                ItemStep::NotPending => continue,
                ItemStep::Finished | ItemStep::Submitted | ItemStep::NoOp => {}
            }

            if index + 1 < keys.len() && !self.ctx.control.is_stopped() {
                let next = keys[index + 1..]
                    .iter()
                    .copied()
                    .find(|k| self.ctx.store.status_of(*k) == Some(ExecStatus::Pending));
                if !self.inter_item_delay(next).await {
                    return Ok(PassOutcome::Stopped);
                }
            }
        }

        Ok(PassOutcome::Completed)
    }

    async fn run_multi_worker(&self, keys: &[ItemKey]) -> Result<PassOutcome> {
        let groups = build_wallet_groups(&self.ctx.store, keys);
        let workers = self.ctx.config.concurrency.min(groups.len()).max(1);
        info!(
            "[SCHEDULER] Multi-worker pass: {} items in {} wallet groups, {} workers",
            keys.len(),
            groups.len(),
            workers
        );
        self.ctx.events.emit(EngineEvent::PassStarted {
            mode: ExecutionMode::MultiWorker,
            items: keys.len(),
            workers,
        });

        let exits = self.run_groups(groups, workers, None).await;
        Self::merge_exits(&exits)
    }

    async fn run_fast(&self, keys: &[ItemKey]) -> Result<PassOutcome> {
        let groups = build_wallet_groups(&self.ctx.store, keys);
        let workers = self.ctx.config.concurrency.min(groups.len()).max(1);
        info!(
            "[FAST-MODE] Submitting {} items from {} wallet groups with {} workers",
            keys.len(),
            groups.len(),
            workers
        );
        self.ctx.events.emit(EngineEvent::PassStarted {
            mode: ExecutionMode::Fast,
            items: keys.len(),
            workers,
        });

        let pending = PendingSet::new();
        let sender_done = Arc::new(AtomicBool::new(false));
        let monitor_handle =
            ConfirmationPoller::new(self.ctx.clone(), pending.clone(), sender_done.clone()).spawn();

        let exits = self.run_groups(groups, workers, Some(&pending)).await;

        // Signal submission is done, then wait for every confirmation
        sender_done.store(true, Ordering::Release);
        let stats = monitor_handle.await?;
        debug!("[FAST-MODE] Confirmation stats: {:?}", stats);

        Self::merge_exits(&exits)
    }

    fn merge_exits(exits: &[WorkerExit]) -> Result<PassOutcome> {
        if exits.contains(&WorkerExit::Fatal) {
            Err(EngineError::FeeCeilingExceeded)
        } else if exits.contains(&WorkerExit::Stopped) {
            Ok(PassOutcome::Stopped)
        } else {
            Ok(PassOutcome::Completed)
        }
    }

    /// `workers` cooperative workers pull whole groups from a shared queue.
    async fn run_groups(
        &self,
        groups: Vec<WalletGroup>,
        workers: usize,
        pending: Option<&PendingSet>,
    ) -> Vec<WorkerExit> {
        let queue = Arc::new(Mutex::new(VecDeque::from(groups)));
        let workers = (0..workers).map(|_| self.group_worker(queue.clone(), pending));
        join_all(workers).await
    }

    async fn group_worker(
        &self,
        queue: Arc<Mutex<VecDeque<WalletGroup>>>,
        pending: Option<&PendingSet>,
    ) -> WorkerExit {
        loop {
            if self.ctx.control.is_stopped() {
                return WorkerExit::Stopped;
            }
            let Some(group) = queue.lock().await.pop_front() else {
                return WorkerExit::Drained;
            };

            for (index, key) in group.keys.iter().enumerate() {
                if self.ctx.control.is_stopped() {
                    return WorkerExit::Stopped;
                }
                match self.process_item(*key, pending).await {
                    ItemStep::Fatal => return WorkerExit::Fatal,
                    ItemStep::Stopped => return WorkerExit::Stopped,
                    ItemStep::Finished | ItemStep::Submitted | ItemStep::NoOp
                        if self.ctx.config.delay_in_groups && index + 1 < group.keys.len() =>
                    {
                        if !self.inter_item_delay(Some(group.keys[index + 1])).await {
                            return WorkerExit::Stopped;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Jittered pause between items. Returns false if a stop cut it short.
    async fn inter_item_delay(&self, next: Option<ItemKey>) -> bool {
        let delay = self.draw_delay();
        if delay.is_zero() {
            return true;
        }
        self.ctx.events.emit(EngineEvent::DelayStarted { next, delay });
        self.ctx.control.sleep(delay).await
    }

    fn draw_delay(&self) -> Duration {
        let [min, max] = self.ctx.config.delay;
        let min_ms = (min * 1000.0).round() as u64;
        let max_ms = (max * 1000.0).round() as u64;
        let ms = if max_ms > min_ms {
            rand::thread_rng().gen_range(min_ms..=max_ms)
        } else {
            min_ms
        };
        Duration::from_millis(ms)
    }

    /// Fee gate, amount resolution and the adapter call for one item. With
    /// `pending` set the broadcast-only command is used and the item stays
    /// Running until the confirmation loop resolves it.
    async fn process_item(&self, key: ItemKey, pending: Option<&PendingSet>) -> ItemStep {
        let ctx = &self.ctx;
        if ctx.control.is_stopped() {
            return ItemStep::Stopped;
        }
        if ctx.store.status_of(key) != Some(ExecStatus::Pending) {
            return ItemStep::NotPending;
        }

        if ctx.fee_gate.admit(Some(key)).await == GateOutcome::Stopped {
            return ItemStep::Stopped;
        }

        if ctx.store.mark_running(key, SUBMITTING_MSG).is_err() {
            return ItemStep::NotPending;
        }
        ctx.events.emit(EngineEvent::ItemStarted { key });

        let balance = if ctx.resolver.strategy().needs_balance() {
            ctx.ensure_balance(key).await
        } else {
            None
        };

        let Some(item) = ctx.store.get_by_key(key) else {
            return ItemStep::NotPending;
        };

        let amount = match ctx.resolver.resolve(&item, balance) {
            Ok(Resolution::Send(amount)) => amount,
            Ok(Resolution::Skip { balance }) => {
                debug!("[SCHEDULER] {} skipped, balance {} inside retention range", key, balance);
                ctx.record_success(key, None, SKIPPED_WITHIN_RANGE_MSG);
                return ItemStep::NoOp;
            }
            Err(failure) => {
                // Neither a missing import amount nor a short wallet fixes itself on retry
                let retryable = ctx.config.error_retry
                    && !matches!(
                        failure,
                        ItemFailure::MissingItemAmount | ItemFailure::InsufficientBalance { .. }
                    );
                ctx.record_failure_with(key, failure.to_string(), retryable);
                return ItemStep::NoOp;
            }
        };

        let request = TransferRequest {
            chain: ctx.config.chain.clone(),
            item_key: key,
            from_addr: item.address.clone(),
            to_addr: item.to_addr.clone(),
            signing_material: item.signing_material.clone(),
            amount,
            coin: ctx.config.coin.clone(),
            fee_policy: ctx.config.fee_policy.clone(),
            max_fee_price: ctx.config.max_fee_price,
        };
        let command = ctx.strategy.transfer_command(&ctx.config.coin, pending.is_some());

        match command.invoke(ctx.adapter.as_ref(), &request).await {
            Ok(outcome) => match (outcome.accepted_tx_id(), pending) {
                (Some(tx_id), Some(pending)) => {
                    let tx_id = tx_id.to_string();
                    let _ = ctx.store.set_message(
                        key,
                        format!("submitted, awaiting confirmation: {}...", short_hash(&tx_id)),
                    );
                    pending.push(PendingConfirmation::new(key, tx_id.clone())).await;
                    ctx.events.emit(EngineEvent::ItemSubmitted { key, tx_id });
                    ItemStep::Submitted
                }
                (Some(tx_id), None) => {
                    ctx.record_success(key, Some(tx_id.to_string()), tx_id);
                    ItemStep::Finished
                }
                (None, _) => {
                    let reason = outcome.error.clone().unwrap_or_else(|| "transfer failed".to_string());
                    ctx.record_failure(key, ItemFailure::AdapterBusinessFailure(reason).to_string());
                    ItemStep::Finished
                }
            },
            Err(e) if e.is_fee_ceiling_exceeded() => {
                error!("[SCHEDULER] {} hit the fee ceiling, aborting batch", key);
                ctx.control.stop();
                if let Err(e) = ctx.store.rollback_to_pending(key) {
                    error!("[SCHEDULER] Rollback of {} failed: {}", key, e);
                }
                ItemStep::Fatal
            }
            Err(e) => {
                ctx.record_failure(key, ItemFailure::AdapterBusinessFailure(e.message().to_string()).to_string());
                ItemStep::Finished
            }
        }
    }
}
