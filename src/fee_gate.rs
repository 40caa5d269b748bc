use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapter::ChainAdapter;
use crate::control::ExecutionControl;
use crate::events::{EngineEvent, EventSink};
use crate::item::ItemKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Open,
    Stopped,
}

/// Fee-price backpressure. While the network price is above the ceiling no
/// worker starts another item.
#[derive(Clone)]
pub struct FeeGate {
    adapter: Arc<dyn ChainAdapter>,
    chain: String,
    ceiling: Option<f64>,
    poll_interval: Duration,
    control: ExecutionControl,
    events: EventSink,
}

impl FeeGate {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        chain: impl Into<String>,
        ceiling: Option<f64>,
        poll_interval: Duration,
        control: ExecutionControl,
        events: EventSink,
    ) -> Self {
        Self {
            adapter,
            chain: chain.into(),
            ceiling,
            poll_interval,
            control,
            events,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ceiling.is_some()
    }

    /// True when the current fee price is within the ceiling. A failed price
    /// query counts as over the ceiling.
    pub async fn check(&self) -> bool {
        self.probe().await.0
    }

    async fn probe(&self) -> (bool, Option<f64>) {
        let Some(ceiling) = self.ceiling else {
            return (true, None);
        };
        match self.adapter.get_fee_price(&self.chain).await {
            Ok(price) => (price <= ceiling, Some(price)),
            Err(e) => {
                warn!("[FEE-GATE] Fee price query failed: {}", e);
                (false, None)
            }
        }
    }

    /// Blocks until new work may start. Waits out a pause held by another
    /// worker, then checks the price; if it is over the ceiling this worker
    /// takes the global pause and monitors until the price recovers.
    pub async fn admit(&self, at: Option<ItemKey>) -> GateOutcome {
        loop {
            if self.control.is_stopped() {
                return GateOutcome::Stopped;
            }

            if self.control.is_paused() {
                if !self.control.sleep(self.poll_interval).await {
                    return GateOutcome::Stopped;
                }
                continue;
            }

            if !self.is_enabled() {
                return GateOutcome::Open;
            }

            let (ok, price) = self.probe().await;
            if ok {
                return GateOutcome::Open;
            }

            if self.control.try_pause() {
                let outcome = self.monitor(at, price).await;
                self.control.resume();
                return outcome;
            }
        }
    }

    async fn monitor(&self, at: Option<ItemKey>, price: Option<f64>) -> GateOutcome {
        let ceiling = self.ceiling.unwrap_or_default();
        match (at, price) {
            (Some(key), Some(p)) => info!(
                "[FEE-GATE] Fee price {} above ceiling {}, pausing before {}",
                p, ceiling, key
            ),
            _ => info!("[FEE-GATE] Fee price unavailable or above ceiling {}, pausing", ceiling),
        }
        self.events.emit(EngineEvent::FeeGatePaused { at, price, ceiling });

        loop {
            if !self.control.sleep(self.poll_interval).await {
                info!("[FEE-GATE] Stop requested while paused");
                return GateOutcome::Stopped;
            }
            if let (true, Some(price)) = self.probe().await {
                info!("[FEE-GATE] Fee price back to {}, resuming", price);
                self.events.emit(EngineEvent::FeeGateResumed { price });
                return GateOutcome::Open;
            }
        }
    }
}
