use std::sync::Arc;

use crate::adapter::{ChainAdapter, TransferOutcome, TransferRequest};
use crate::config::{ChainFamily, CoinKind};
use crate::error::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCommand {
    Native,
    Token,
    NativeFast,
    TokenFast,
}

impl TransferCommand {
    pub fn select(coin: &CoinKind, fast: bool) -> Self {
        match (coin.is_native(), fast) {
            (true, false) => TransferCommand::Native,
            (false, false) => TransferCommand::Token,
            (true, true) => TransferCommand::NativeFast,
            (false, true) => TransferCommand::TokenFast,
        }
    }

    pub async fn invoke(
        self,
        adapter: &dyn ChainAdapter,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, AdapterError> {
        match self {
            TransferCommand::Native => adapter.transfer_native(request).await,
            TransferCommand::Token => adapter.transfer_token(request).await,
            TransferCommand::NativeFast => adapter.transfer_native_fast(request).await,
            TransferCommand::TokenFast => adapter.transfer_token_fast(request).await,
        }
    }
}

/// Per chain-family behaviour, picked once per session.
pub trait ChainStrategy: Send + Sync {
    fn family(&self) -> ChainFamily;

    /// Recipient form used when asking the chain about past transfers.
    fn normalize_recipient(&self, address: &str) -> String;

    /// Whether missing balances are fetched in one batch before a pass
    /// instead of lazily per item.
    fn prefetch_balances(&self) -> bool;

    fn transfer_command(&self, coin: &CoinKind, fast: bool) -> TransferCommand {
        TransferCommand::select(coin, fast)
    }
}

/// EVM-compatible chains. Hex addresses are case-insensitive.
pub struct EvmStrategy;

impl ChainStrategy for EvmStrategy {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn normalize_recipient(&self, address: &str) -> String {
        address.trim().to_lowercase()
    }

    fn prefetch_balances(&self) -> bool {
        false
    }
}

/// Account-model chains with base58 addresses, which are case-sensitive.
pub struct SolanaStrategy;

impl ChainStrategy for SolanaStrategy {
    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
    }

    fn normalize_recipient(&self, address: &str) -> String {
        address.trim().to_string()
    }

    fn prefetch_balances(&self) -> bool {
        true
    }
}

pub fn strategy_for(family: ChainFamily) -> Arc<dyn ChainStrategy> {
    match family {
        ChainFamily::Evm => Arc::new(EvmStrategy),
        ChainFamily::Solana => Arc::new(SolanaStrategy),
    }
}
