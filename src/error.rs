use thiserror::Error;

use crate::item::{ExecStatus, ItemKey};

/// Reserved adapter error content meaning "abort the whole batch now".
pub const FEE_CEILING_EXCEEDED_SIGNAL: &str = "base gas price exceeds maximum limit";

pub type Result<T> = std::result::Result<T, EngineError>;

/// Conditions that terminate a batch. Per-item failures never surface here;
/// they are recorded on the item instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Fee price exceeded the hard ceiling, batch aborted")]
    FeeCeilingExceeded,

    #[error("Unknown coin kind: {0}")]
    UnknownCoinKind(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("item {0} not found")]
    NotFound(ItemKey),

    #[error("illegal status transition for item {key}: {from:?} -> {to:?}")]
    IllegalTransition {
        key: ItemKey,
        from: ExecStatus,
        to: ExecStatus,
    },
}

/// Opaque error reported by the chain adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AdapterError {
    message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fee_ceiling_exceeded(&self) -> bool {
        self.message.trim() == FEE_CEILING_EXCEEDED_SIGNAL
    }
}

/// Per-item failure reasons, rendered into the item's `error_msg`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ItemFailure {
    #[error("{0}")]
    AdapterBusinessFailure(String),

    #[error("confirmation timeout")]
    ConfirmationTimeout,

    #[error("missing per-item amount")]
    MissingItemAmount,

    #[error("balance unavailable")]
    BalanceUnavailable,

    #[error("insufficient balance: {balance} is below the retention minimum {min}")]
    InsufficientBalance { balance: f64, min: f64 },
}
