use rand::Rng;
use serde::{Serialize, Serializer};

use crate::config::AmountStrategy;
use crate::error::ItemFailure;
use crate::item::TransferItem;

/// Wire value telling the adapter to send everything it can.
pub const SEND_ALL_SENTINEL: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferAmount {
    /// The adapter computes the sendable amount after fees.
    All,
    Exact(f64),
}

impl TransferAmount {
    pub fn as_wire(self) -> f64 {
        match self {
            TransferAmount::All => SEND_ALL_SENTINEL,
            TransferAmount::Exact(value) => value,
        }
    }
}

impl Serialize for TransferAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Send(TransferAmount),
    /// Balance already inside the retention range; nothing to send.
    Skip { balance: f64 },
}

#[derive(Debug, Clone)]
pub struct AmountResolver {
    strategy: AmountStrategy,
    precision: u32,
}

impl AmountResolver {
    pub fn new(strategy: AmountStrategy, precision: u32) -> Self {
        Self { strategy, precision }
    }

    pub fn strategy(&self) -> &AmountStrategy {
        &self.strategy
    }

    pub fn resolve(&self, item: &TransferItem, balance: Option<f64>) -> Result<Resolution, ItemFailure> {
        self.resolve_with(item, balance, &mut rand::thread_rng())
    }

    pub fn resolve_with<R: Rng + ?Sized>(
        &self,
        item: &TransferItem,
        balance: Option<f64>,
        rng: &mut R,
    ) -> Result<Resolution, ItemFailure> {
        match &self.strategy {
            AmountStrategy::SendAll => Ok(Resolution::Send(TransferAmount::All)),
            AmountStrategy::Fixed { amount } => Ok(Resolution::Send(TransferAmount::Exact(*amount))),
            AmountStrategy::FromItem => match item.amount {
                Some(amount) if amount > 0.0 => Ok(Resolution::Send(TransferAmount::Exact(amount))),
                _ => Err(ItemFailure::MissingItemAmount),
            },
            AmountStrategy::RangeRandom { min, max } => {
                let drawn = uniform(rng, *min, *max);
                Ok(Resolution::Send(TransferAmount::Exact(round_to(drawn, self.precision))))
            }
            AmountStrategy::RemainderRandom { min, max } => {
                let balance = balance.ok_or(ItemFailure::BalanceUnavailable)?;
                if balance < *min {
                    return Err(ItemFailure::InsufficientBalance { balance, min: *min });
                }
                // Anything at or below the top of the range would leave the
                // wallet inside the retention window
                if balance <= *max {
                    return Ok(Resolution::Skip { balance });
                }
                let retention = uniform(rng, *min, *max);
                let amount = (balance - retention).max(0.0);
                Ok(Resolution::Send(TransferAmount::Exact(round_to(amount, self.precision))))
            }
        }
    }

    /// The amount the retry check may match on-chain, if the strategy fixes one.
    pub fn expected_amount(&self, item: &TransferItem) -> Option<f64> {
        match &self.strategy {
            AmountStrategy::Fixed { amount } => Some(*amount),
            AmountStrategy::FromItem => item.amount,
            _ => None,
        }
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    if max > min {
        rng.gen_range(min..=max)
    } else {
        min
    }
}

pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10_f64.powi(precision as i32);
    (value * factor).round() / factor
}
