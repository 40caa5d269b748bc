use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::error::ItemFailure;
use crate::item::ItemKey;

pub const CONFIRM_BATCH_SIZE: usize = 50;
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);
pub const CONFIRM_INTERVAL: Duration = Duration::from_secs(1);
const IDLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub item_key: ItemKey,
    pub tx_hash: String,
    pub submit_time: Instant,
}

impl PendingConfirmation {
    pub fn new(item_key: ItemKey, tx_hash: impl Into<String>) -> Self {
        Self {
            item_key,
            tx_hash: tx_hash.into(),
            submit_time: Instant::now(),
        }
    }
}

/// Broadcast transactions waiting for finality, oldest first.
#[derive(Debug, Clone, Default)]
pub struct PendingSet {
    inner: Arc<Mutex<Vec<PendingConfirmation>>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, entry: PendingConfirmation) {
        self.inner.lock().await.push(entry);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmationStats {
    pub confirmed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub abandoned: usize,
    pub batch_queries: usize,
}

/// Fast-mode confirmation loop. Runs beside the submission workers and owns
/// the terminal transition of every submitted item.
pub struct ConfirmationPoller {
    ctx: Arc<ExecutionContext>,
    pending: PendingSet,
    submission_done: Arc<AtomicBool>,
    batch_size: usize,
    timeout: Duration,
    interval: Duration,
}

impl ConfirmationPoller {
    pub fn new(ctx: Arc<ExecutionContext>, pending: PendingSet, submission_done: Arc<AtomicBool>) -> Self {
        Self {
            ctx,
            pending,
            submission_done,
            batch_size: CONFIRM_BATCH_SIZE,
            timeout: CONFIRM_TIMEOUT,
            interval: CONFIRM_INTERVAL,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<ConfirmationStats> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> ConfirmationStats {
        let mut stats = ConfirmationStats::default();
        let chain = self.ctx.config.chain.clone();

        loop {
            if self.ctx.control.is_stopped() {
                // In-flight broadcasts may still land in the set after a stop
                if !self.submission_done.load(Ordering::Acquire) {
                    tokio::time::sleep(IDLE_INTERVAL).await;
                    continue;
                }
                stats.abandoned = self.abandon_remaining().await;
                break;
            }

            if self.pending.is_empty().await {
                // Only exit once the submitters are finished and nothing is outstanding
                if self.submission_done.load(Ordering::Acquire) {
                    break;
                }
                self.ctx.control.sleep(IDLE_INTERVAL).await;
                continue;
            }

            stats.timed_out += self.evict_expired().await;

            let batch: Vec<PendingConfirmation> = {
                let pending = self.pending.inner.lock().await;
                pending.iter().take(self.batch_size).cloned().collect()
            };
            if batch.is_empty() {
                continue;
            }

            let hashes: Vec<String> = batch.iter().map(|p| p.tx_hash.clone()).collect();
            stats.batch_queries += 1;
            match self
                .ctx
                .adapter
                .check_transactions_status_batch(&chain, &hashes)
                .await
            {
                Ok(reports) => {
                    let mut resolved = Vec::new();
                    for report in reports {
                        let Some(entry) = batch.iter().find(|p| p.tx_hash == report.hash) else {
                            continue;
                        };
                        if !report.status.confirmed {
                            let _ = self.ctx.store.set_message(
                                entry.item_key,
                                format!("confirming... {}", short_hash(&entry.tx_hash)),
                            );
                            continue;
                        }
                        if report.status.success == Some(true) {
                            self.ctx
                                .record_success(entry.item_key, Some(entry.tx_hash.clone()), entry.tx_hash.clone());
                            stats.confirmed += 1;
                        } else {
                            let reason = report
                                .status
                                .error
                                .clone()
                                .unwrap_or_else(|| "transaction execution failed".to_string());
                            self.ctx.record_failure(entry.item_key, reason);
                            stats.failed += 1;
                        }
                        resolved.push(entry.tx_hash.clone());
                    }
                    if !resolved.is_empty() {
                        self.pending
                            .inner
                            .lock()
                            .await
                            .retain(|p| !resolved.contains(&p.tx_hash));
                    }
                }
                Err(e) => warn!("[FAST-MODE] Batch status query failed: {}", e),
            }

            self.ctx.control.sleep(self.interval).await;
        }

        info!(
            "[FAST-MODE] Confirmation loop done: {} confirmed, {} failed, {} timed out, {} queries",
            stats.confirmed, stats.failed, stats.timed_out, stats.batch_queries
        );
        stats
    }

    async fn evict_expired(&self) -> usize {
        let expired: Vec<PendingConfirmation> = {
            let mut pending = self.pending.inner.lock().await;
            let (expired, alive): (Vec<_>, Vec<_>) = pending
                .drain(..)
                .partition(|p| p.submit_time.elapsed() > self.timeout);
            *pending = alive;
            expired
        };
        for entry in &expired {
            debug!("[FAST-MODE] {} confirmation timed out ({})", entry.item_key, entry.tx_hash);
            self.ctx
                .record_failure(entry.item_key, ItemFailure::ConfirmationTimeout.to_string());
        }
        expired.len()
    }

    /// On stop, outstanding items cannot stay Running; they fail with the
    /// hash kept in the message so an operator can look them up. The network
    /// already accepted these, so they are never flagged for retry.
    async fn abandon_remaining(&self) -> usize {
        let remaining: Vec<PendingConfirmation> = self.pending.inner.lock().await.drain(..).collect();
        for entry in &remaining {
            self.ctx.record_failure_with(
                entry.item_key,
                format!("stopped before confirmation: {}", entry.tx_hash),
                false,
            );
        }
        remaining.len()
    }
}

pub(crate) fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(15) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::TxStatus;
    use crate::config::EngineConfig;
    use crate::control::ExecutionControl;
    use crate::events::EventSink;
    use crate::item::{ExecStatus, NewTransfer};
    use crate::store::TransferStore;
    use crate::test_utils::MockChainAdapter;

    /// Store with `n` items already submitted (Running) and registered as pending.
    async fn submitted(n: usize, adapter: Arc<MockChainAdapter>) -> (Arc<ExecutionContext>, PendingSet, Vec<ItemKey>) {
        let store = Arc::new(TransferStore::new());
        let keys = store.extend((0..n).map(|i| NewTransfer::new(format!("pk{}", i), format!("to{}", i))));
        let pending = PendingSet::new();
        for (i, key) in keys.iter().enumerate() {
            store.mark_running(*key, "").unwrap();
            pending.push(PendingConfirmation::new(*key, format!("0xhash{:03}", i))).await;
        }
        let ctx = Arc::new(ExecutionContext::new(
            EngineConfig::default(),
            store,
            adapter,
            ExecutionControl::new(),
            EventSink::disabled(),
        ));
        (ctx, pending, keys)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixty_pending_take_two_batches() {
        let adapter = Arc::new(MockChainAdapter::new());
        let (ctx, pending, keys) = submitted(60, adapter.clone()).await;

        let stats = ConfirmationPoller::new(ctx.clone(), pending.clone(), Arc::new(AtomicBool::new(true)))
            .run()
            .await;

        assert_eq!(adapter.status_batches(), vec![50, 10]);
        assert_eq!(stats.confirmed, 60);
        assert!(pending.is_empty().await);
        for key in keys {
            let item = ctx.store.get_by_key(key).unwrap();
            assert_eq!(item.exec_status, ExecStatus::Success);
            assert!(item.tx_id.unwrap().starts_with("0xhash"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_failure_is_retryable() {
        let adapter = Arc::new(MockChainAdapter::new());
        adapter.set_status(
            "0xhash001",
            TxStatus {
                confirmed: true,
                success: Some(false),
                error: Some("execution reverted".into()),
            },
        );
        let (ctx, pending, keys) = submitted(2, adapter.clone()).await;

        let stats = ConfirmationPoller::new(ctx.clone(), pending, Arc::new(AtomicBool::new(true)))
            .run()
            .await;

        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.failed, 1);
        let failed = ctx.store.get_by_key(keys[1]).unwrap();
        assert_eq!(failed.exec_status, ExecStatus::Failed);
        assert_eq!(failed.error_msg, "execution reverted");
        assert!(failed.retry_flag);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_entries_time_out() {
        let adapter = Arc::new(MockChainAdapter::new());
        adapter.set_never_confirm(true);
        let (ctx, pending, keys) = submitted(3, adapter.clone()).await;

        let start = Instant::now();
        let stats = ConfirmationPoller::new(ctx.clone(), pending.clone(), Arc::new(AtomicBool::new(true)))
            .run()
            .await;

        assert_eq!(stats.timed_out, 3);
        assert!(pending.is_empty().await);
        // Evicted on the first cycle past the timeout, never long after it
        assert!(start.elapsed() > CONFIRM_TIMEOUT);
        assert!(start.elapsed() <= CONFIRM_TIMEOUT + Duration::from_secs(2));
        for key in keys {
            let item = ctx.store.get_by_key(key).unwrap();
            assert_eq!(item.exec_status, ExecStatus::Failed);
            assert_eq!(item.error_msg, "confirmation timeout");
            assert!(item.retry_flag);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_submission_to_finish() {
        let adapter = Arc::new(MockChainAdapter::new());
        let (ctx, pending, _) = submitted(0, adapter.clone()).await;
        let submission_done = Arc::new(AtomicBool::new(false));

        let handle = ConfirmationPoller::new(ctx.clone(), pending.clone(), submission_done.clone()).spawn();

        // Late submission after the loop is already idling
        tokio::time::sleep(Duration::from_secs(3)).await;
        let key = ctx.store.insert(NewTransfer::new("pk", "to"));
        ctx.store.mark_running(key, "").unwrap();
        pending.push(PendingConfirmation::new(key, "0xlate")).await;
        submission_done.store(true, Ordering::Release);

        let stats = handle.await.unwrap();
        assert_eq!(stats.confirmed, 1);
        assert_eq!(ctx.store.status_of(key), Some(ExecStatus::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_outstanding_entries() {
        let adapter = Arc::new(MockChainAdapter::new());
        adapter.set_never_confirm(true);
        let (ctx, pending, keys) = submitted(2, adapter.clone()).await;
        let control = ctx.control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            control.stop();
        });

        let stats = ConfirmationPoller::new(ctx.clone(), pending, Arc::new(AtomicBool::new(true)))
            .run()
            .await;

        assert_eq!(stats.abandoned, 2);
        let item = ctx.store.get_by_key(keys[0]).unwrap();
        assert_eq!(item.exec_status, ExecStatus::Failed);
        assert!(item.error_msg.contains("0xhash000"));
        // Already broadcast, so never queued for a second payment
        assert!(!item.retry_flag);
        assert!(ctx.store.retryable_failures(&keys).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_late_submission() {
        let adapter = Arc::new(MockChainAdapter::new());
        adapter.set_never_confirm(true);
        let (ctx, pending, _) = submitted(0, adapter.clone()).await;
        let submission_done = Arc::new(AtomicBool::new(false));
        ctx.control.stop();

        let handle = ConfirmationPoller::new(ctx.clone(), pending.clone(), submission_done.clone()).spawn();

        // A broadcast that was in flight when the stop landed
        tokio::time::sleep(Duration::from_secs(3)).await;
        let key = ctx.store.insert(NewTransfer::new("pk", "to"));
        ctx.store.mark_running(key, "").unwrap();
        pending.push(PendingConfirmation::new(key, "0xinflight")).await;
        submission_done.store(true, Ordering::Release);

        let stats = handle.await.unwrap();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(ctx.store.status_of(key), Some(ExecStatus::Failed));
        assert!(pending.is_empty().await);
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("0x1234567890abcdef1234"), "0x1234567890abc");
        assert_eq!(short_hash("0xabc"), "0xabc");
    }
}
