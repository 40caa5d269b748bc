use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Above this concurrency the scheduler switches to decoupled submit/confirm execution.
pub const FAST_MODE_THRESHOLD: usize = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    Evm,
    Solana,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoinKind {
    Native {
        symbol: String,
    },
    Token {
        symbol: String,
        contract_address: String,
        #[serde(default)]
        decimals: Option<u8>,
    },
}

impl CoinKind {
    /// Builds a coin descriptor from loosely-typed input (CLI flags, imported
    /// config). Unrecognized kinds are fatal.
    pub fn from_parts(kind: &str, symbol: &str, contract_address: Option<&str>) -> Result<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "native" | "base" => Ok(CoinKind::Native {
                symbol: symbol.to_string(),
            }),
            "token" => Ok(CoinKind::Token {
                symbol: symbol.to_string(),
                contract_address: contract_address.unwrap_or_default().to_string(),
                decimals: None,
            }),
            other => Err(EngineError::UnknownCoinKind(other.to_string())),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, CoinKind::Native { .. })
    }

    pub fn symbol(&self) -> &str {
        match self {
            CoinKind::Native { symbol } | CoinKind::Token { symbol, .. } => symbol,
        }
    }

    pub fn contract_address(&self) -> Option<&str> {
        match self {
            CoinKind::Native { .. } => None,
            CoinKind::Token { contract_address, .. } => Some(contract_address),
        }
    }
}

/// How much each item sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AmountStrategy {
    /// Let the adapter send the whole sendable balance.
    SendAll,
    /// Same amount for every item.
    Fixed { amount: f64 },
    /// Fixed amount taken from each item's imported `amount`.
    FromItem,
    RangeRandom { min: f64, max: f64 },
    /// Keep a random retention in `[min, max]`, send the rest.
    RemainderRandom { min: f64, max: f64 },
}

impl AmountStrategy {
    /// Only fixed strategies produce an amount the retry check can match exactly.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, AmountStrategy::Fixed { .. } | AmountStrategy::FromItem)
    }

    pub fn needs_balance(&self) -> bool {
        matches!(self, AmountStrategy::RemainderRandom { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GasPriceMode {
    Auto,
    Fixed { price: f64 },
    /// Network price plus `rate` (0.05 = +5%).
    Rate { rate: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GasLimitMode {
    Auto,
    Fixed { limit: u64 },
    Random { min: u64, max: u64 },
}

/// Fee settings forwarded untouched to the chain adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub gas_price: GasPriceMode,
    pub gas_limit: GasLimitMode,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            gas_price: GasPriceMode::Rate { rate: 0.05 },
            gas_limit: GasLimitMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chain name passed to the adapter ("eth", "bsc", "sol", ...).
    pub chain: String,
    pub chain_family: ChainFamily,
    pub coin: CoinKind,
    pub strategy: AmountStrategy,
    /// Decimal places for random amounts.
    pub precision: u32,
    pub concurrency: usize,
    pub multi_worker: bool,
    /// Inter-item delay bounds in seconds.
    pub delay: [f64; 2],
    /// Apply the inter-item delay inside wallet groups as well.
    pub delay_in_groups: bool,
    /// Fee price ceiling. `None` disables the fee gate.
    pub max_fee_price: Option<f64>,
    pub fee_poll_interval_ms: u64,
    pub error_retry: bool,
    pub error_count_limit: u32,
    pub fee_policy: FeePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain: "eth".to_string(),
            chain_family: ChainFamily::Evm,
            coin: CoinKind::Native {
                symbol: "ETH".to_string(),
            },
            strategy: AmountStrategy::RangeRandom { min: 1.0, max: 100.0 },
            precision: 6,
            concurrency: 1,
            multi_worker: false,
            delay: [1.0, 3.0],
            delay_in_groups: false,
            max_fee_price: None,
            fee_poll_interval_ms: 1000,
            error_retry: true,
            error_count_limit: 3,
            fee_policy: FeePolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&data)
            .map_err(|e| EngineError::Configuration(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn is_fast_mode(&self) -> bool {
        self.concurrency > FAST_MODE_THRESHOLD
    }

    pub fn fee_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fee_poll_interval_ms)
    }

    /// Rejects configurations that cannot run. Called before any execution.
    pub fn validate(&self) -> Result<()> {
        if self.chain.trim().is_empty() {
            return Err(config_err("chain must not be empty"));
        }
        if self.concurrency == 0 {
            return Err(config_err("concurrency must be at least 1"));
        }

        let [min_delay, max_delay] = self.delay;
        if min_delay < 0.0 || max_delay < 0.0 {
            return Err(config_err("delay bounds must not be negative"));
        }
        if min_delay > max_delay {
            return Err(config_err("minimum delay must not exceed maximum delay"));
        }

        if self.precision > 18 {
            return Err(config_err("precision must be between 0 and 18"));
        }

        match &self.strategy {
            AmountStrategy::Fixed { amount } => {
                if !amount.is_finite() || *amount <= 0.0 {
                    return Err(config_err("fixed amount must be greater than 0"));
                }
            }
            AmountStrategy::RangeRandom { min, max } | AmountStrategy::RemainderRandom { min, max } => {
                if !min.is_finite() || !max.is_finite() || *min < 0.0 || *max < 0.0 {
                    return Err(config_err("amount range bounds must be non-negative numbers"));
                }
                if min > max {
                    return Err(config_err("amount range minimum must not exceed maximum"));
                }
            }
            AmountStrategy::SendAll | AmountStrategy::FromItem => {}
        }

        if let CoinKind::Token { contract_address, .. } = &self.coin {
            if contract_address.trim().is_empty() {
                return Err(config_err("token transfers require a contract address"));
            }
        }

        if let Some(ceiling) = self.max_fee_price {
            if !ceiling.is_finite() || ceiling <= 0.0 {
                return Err(config_err("fee price ceiling must be greater than 0"));
            }
            if self.fee_poll_interval_ms == 0 {
                return Err(config_err("fee poll interval must be greater than 0"));
            }
        }

        match &self.fee_policy.gas_price {
            GasPriceMode::Fixed { price } if *price <= 0.0 => {
                return Err(config_err("fixed gas price must be greater than 0"));
            }
            GasPriceMode::Rate { rate } if *rate < 0.0 => {
                return Err(config_err("gas price rate must not be negative"));
            }
            _ => {}
        }
        match &self.fee_policy.gas_limit {
            GasLimitMode::Fixed { limit } if *limit == 0 => {
                return Err(config_err("fixed gas limit must be greater than 0"));
            }
            GasLimitMode::Random { min, max } if min > max => {
                return Err(config_err("gas limit minimum must not exceed maximum"));
            }
            _ => {}
        }

        Ok(())
    }
}

fn config_err(msg: &str) -> EngineError {
    EngineError::Configuration(msg.to_string())
}
