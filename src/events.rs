use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::item::{ExecStatus, ItemKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    MultiWorker,
    Fast,
}

impl ExecutionMode {
    pub fn for_config(config: &EngineConfig) -> Self {
        if config.is_fast_mode() {
            ExecutionMode::Fast
        } else if config.multi_worker {
            ExecutionMode::MultiWorker
        } else {
            ExecutionMode::Sequential
        }
    }
}

/// Discrete engine events for a presentation layer. The engine never renders
/// anything itself.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    PassStarted {
        mode: ExecutionMode,
        items: usize,
        workers: usize,
    },
    ItemStarted {
        key: ItemKey,
    },
    /// Fast mode: broadcast accepted, waiting for confirmation.
    ItemSubmitted {
        key: ItemKey,
        tx_id: String,
    },
    ItemFinished {
        key: ItemKey,
        status: ExecStatus,
    },
    /// A jittered pause before `next` starts. Render a countdown from this.
    DelayStarted {
        next: Option<ItemKey>,
        delay: Duration,
    },
    FeeGatePaused {
        at: Option<ItemKey>,
        price: Option<f64>,
        ceiling: f64,
    },
    FeeGateResumed {
        price: f64,
    },
    RetryRoundStarted {
        round: u32,
        candidates: usize,
    },
    RetryRoundVerified {
        round: u32,
        skipped: usize,
        resubmitted: usize,
    },
}

/// Optional event channel. Sends never block and a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
