//! Batch transfer execution engine.
//!
//! Runs many independent native or token transfers through an external
//! chain adapter: wallet-ordered groups under bounded concurrency, a
//! fee-price gate, decoupled submit/confirm for large fan-outs, and retries
//! that check the chain first so nothing is paid twice.

pub mod adapter;
pub mod amount;
pub mod chain;
pub mod config;
pub mod confirm;
pub mod context;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod fee_gate;
pub mod http_adapter;
pub mod item;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use adapter::{ChainAdapter, TransferOutcome, TransferRequest};
pub use config::{AmountStrategy, ChainFamily, CoinKind, EngineConfig};
pub use control::ExecutionControl;
pub use engine::{BatchEngine, SessionOutcome, SessionReport};
pub use error::{AdapterError, EngineError};
pub use events::{EngineEvent, EventSink};
pub use http_adapter::{HttpAdapterSettings, HttpChainAdapter};
pub use item::{ExecStatus, ItemKey, NewTransfer, TransferItem};
pub use progress::Progress;
pub use store::TransferStore;
