use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapter::ChainAdapter;
use crate::amount::AmountResolver;
use crate::chain::{strategy_for, ChainStrategy};
use crate::config::EngineConfig;
use crate::control::ExecutionControl;
use crate::events::{EngineEvent, EventSink};
use crate::fee_gate::FeeGate;
use crate::item::{ExecStatus, ItemKey};
use crate::store::TransferStore;

/// Shared state of one engine run, handed to every worker by `Arc`.
pub struct ExecutionContext {
    pub config: EngineConfig,
    pub store: Arc<TransferStore>,
    pub adapter: Arc<dyn ChainAdapter>,
    pub strategy: Arc<dyn ChainStrategy>,
    pub control: ExecutionControl,
    pub events: EventSink,
    pub fee_gate: FeeGate,
    pub resolver: AmountResolver,
}

impl ExecutionContext {
    pub fn new(
        config: EngineConfig,
        store: Arc<TransferStore>,
        adapter: Arc<dyn ChainAdapter>,
        control: ExecutionControl,
        events: EventSink,
    ) -> Self {
        let strategy = strategy_for(config.chain_family);
        let fee_gate = FeeGate::new(
            adapter.clone(),
            config.chain.clone(),
            config.max_fee_price,
            config.fee_poll_interval(),
            control.clone(),
            events.clone(),
        );
        let resolver = AmountResolver::new(config.strategy.clone(), config.precision);
        Self {
            config,
            store,
            adapter,
            strategy,
            control,
            events,
            fee_gate,
            resolver,
        }
    }

    pub(crate) fn record_success(&self, key: ItemKey, tx_id: Option<String>, message: impl Into<String>) {
        match self.store.mark_success(key, tx_id, message) {
            Ok(()) => self.events.emit(EngineEvent::ItemFinished {
                key,
                status: ExecStatus::Success,
            }),
            Err(e) => warn!("[SCHEDULER] Could not record success: {}", e),
        }
    }

    /// Per-item failure, retry-flagged according to `error_retry` / `error_count_limit`.
    pub(crate) fn record_failure(&self, key: ItemKey, reason: impl Into<String>) {
        self.record_failure_with(key, reason, self.config.error_retry);
    }

    pub(crate) fn record_failure_with(&self, key: ItemKey, reason: impl Into<String>, retryable: bool) {
        let reason = reason.into();
        debug!("[SCHEDULER] {} failed: {}", key, reason);
        match self
            .store
            .mark_failed(key, reason, retryable, self.config.error_count_limit)
        {
            Ok(()) => self.events.emit(EngineEvent::ItemFinished {
                key,
                status: ExecStatus::Failed,
            }),
            Err(e) => warn!("[SCHEDULER] Could not record failure: {}", e),
        }
    }

    /// Returns the item's balance for the configured coin, querying the
    /// adapter when nothing is cached.
    pub(crate) async fn ensure_balance(&self, key: ItemKey) -> Option<f64> {
        let item = self.store.get_by_key(key)?;
        if let Some(balance) = item.cached_balance(&self.config.coin) {
            return Some(balance);
        }
        let address = item.address.as_deref().filter(|a| !a.trim().is_empty())?;

        match self
            .adapter
            .query_balance(&self.config.chain, address, &self.config.coin)
            .await
        {
            Ok(balance) => {
                let coin = &self.config.coin;
                let _ = self
                    .store
                    .update_by_key(key, |item| item.set_cached_balance(coin, balance));
                Some(balance)
            }
            Err(e) => {
                warn!("[SCHEDULER] Balance query for {} failed: {}", key, e);
                None
            }
        }
    }

    /// Fills missing balances for `keys` with one batched query.
    pub(crate) async fn prefetch_balances(&self, keys: &[ItemKey]) {
        let coin = &self.config.coin;
        let missing: Vec<(ItemKey, String)> = keys
            .iter()
            .filter_map(|key| self.store.get_by_key(*key))
            .filter(|item| item.exec_status == ExecStatus::Pending && item.cached_balance(coin).is_none())
            .filter_map(|item| {
                item.address
                    .clone()
                    .filter(|a| !a.trim().is_empty())
                    .map(|addr| (item.key, addr))
            })
            .collect();
        if missing.is_empty() {
            return;
        }

        let addresses: Vec<String> = missing.iter().map(|(_, addr)| addr.clone()).collect();
        match self
            .adapter
            .query_balances_batch(&self.config.chain, coin, &addresses)
            .await
        {
            Ok(reports) => {
                let mut filled = 0;
                for (key, addr) in &missing {
                    let balance = reports
                        .iter()
                        .find(|report| &report.address == addr)
                        .and_then(|report| report.balance);
                    if let Some(balance) = balance {
                        let _ = self
                            .store
                            .update_by_key(*key, |item| item.set_cached_balance(coin, balance));
                        filled += 1;
                    }
                }
                debug!("[SCHEDULER] Prefetched {}/{} balances", filled, missing.len());
            }
            Err(e) => warn!("[SCHEDULER] Batch balance query failed: {}", e),
        }
    }
}
