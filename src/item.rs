use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::config::CoinKind;

/// Stable identifier assigned at import. Never reused within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey(pub u64);

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ExecStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecStatus::Success | ExecStatus::Failed)
    }
}

/// Secret authorizing a transfer. Redacted in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningMaterial(String);

impl SigningMaterial {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningMaterial(***)")
    }
}

impl Serialize for SigningMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SigningMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SigningMaterial)
    }
}

/// Import-time data for one transfer, before a key is assigned.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub address: Option<String>,
    pub to_addr: String,
    pub signing_material: SigningMaterial,
    pub amount: Option<f64>,
    pub native_balance: Option<f64>,
    pub token_balance: Option<f64>,
}

impl NewTransfer {
    pub fn new(signing_material: impl Into<String>, to_addr: impl Into<String>) -> Self {
        Self {
            address: None,
            to_addr: to_addr.into(),
            signing_material: SigningMaterial::new(signing_material),
            amount: None,
            native_balance: None,
            token_balance: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_native_balance(mut self, balance: f64) -> Self {
        self.native_balance = Some(balance);
        self
    }

    pub fn with_token_balance(mut self, balance: f64) -> Self {
        self.token_balance = Some(balance);
        self
    }
}

/// One planned transfer and its execution state.
#[derive(Debug, Clone)]
pub struct TransferItem {
    pub key: ItemKey,
    pub address: Option<String>,
    pub to_addr: String,
    pub signing_material: SigningMaterial,
    pub amount: Option<f64>,
    pub native_balance: Option<f64>,
    pub token_balance: Option<f64>,
    pub exec_status: ExecStatus,
    /// Display message. Holds the transaction id once the item succeeds.
    pub error_msg: String,
    pub tx_id: Option<String>,
    pub retry_flag: bool,
    pub error_count: u32,
}

impl TransferItem {
    pub(crate) fn from_new(key: ItemKey, new: NewTransfer) -> Self {
        Self {
            key,
            address: new.address,
            to_addr: new.to_addr,
            signing_material: new.signing_material,
            amount: new.amount,
            native_balance: new.native_balance,
            token_balance: new.token_balance,
            exec_status: ExecStatus::Pending,
            error_msg: String::new(),
            tx_id: None,
            retry_flag: false,
            error_count: 0,
        }
    }

    /// Wallet group identity: the signer address, or the signing material
    /// when no address was imported.
    pub fn signer_id(&self) -> &str {
        match self.address.as_deref() {
            Some(addr) if !addr.trim().is_empty() => addr,
            _ => self.signing_material.expose(),
        }
    }

    pub fn cached_balance(&self, coin: &CoinKind) -> Option<f64> {
        if coin.is_native() {
            self.native_balance
        } else {
            self.token_balance
        }
    }

    pub fn set_cached_balance(&mut self, coin: &CoinKind, balance: f64) {
        if coin.is_native() {
            self.native_balance = Some(balance);
        } else {
            self.token_balance = Some(balance);
        }
    }

    pub fn is_retryable_failure(&self) -> bool {
        self.exec_status == ExecStatus::Failed && self.retry_flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_material_redacted() {
        let item = TransferItem::from_new(ItemKey(1), NewTransfer::new("super-secret", "0xabc"));
        let debug = format!("{:?}", item);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("SigningMaterial(***)"));
    }

    #[test]
    fn test_signer_id_prefers_address() {
        let with_addr = TransferItem::from_new(
            ItemKey(1),
            NewTransfer::new("pk1", "to").with_address("0xSigner"),
        );
        assert_eq!(with_addr.signer_id(), "0xSigner");

        let blank_addr = TransferItem::from_new(ItemKey(2), NewTransfer::new("pk2", "to").with_address("  "));
        assert_eq!(blank_addr.signer_id(), "pk2");
    }

    #[test]
    fn test_cached_balance_by_coin() {
        let mut item = TransferItem::from_new(ItemKey(1), NewTransfer::new("pk", "to").with_native_balance(2.5));
        let native = CoinKind::Native { symbol: "ETH".into() };
        let token = CoinKind::Token {
            symbol: "USDC".into(),
            contract_address: "0xdead".into(),
            decimals: Some(6),
        };
        assert_eq!(item.cached_balance(&native), Some(2.5));
        assert_eq!(item.cached_balance(&token), None);

        item.set_cached_balance(&token, 10.0);
        assert_eq!(item.cached_balance(&token), Some(10.0));

        let seeded = TransferItem::from_new(ItemKey(2), NewTransfer::new("pk", "to").with_token_balance(4.0));
        assert_eq!(seeded.cached_balance(&token), Some(4.0));
        assert_eq!(seeded.cached_balance(&native), None);
    }
}
