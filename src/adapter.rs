use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::amount::TransferAmount;
use crate::config::{CoinKind, FeePolicy};
use crate::error::AdapterError;
use crate::item::{ItemKey, SigningMaterial};

/// Everything the adapter needs to sign and broadcast one transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    pub chain: String,
    pub item_key: ItemKey,
    pub from_addr: Option<String>,
    pub to_addr: String,
    pub signing_material: SigningMaterial,
    pub amount: TransferAmount,
    pub coin: CoinKind,
    pub fee_policy: FeePolicy,
    pub max_fee_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub success: bool,
    #[serde(default, alias = "tx_hash")]
    pub tx_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TransferOutcome {
    pub fn submitted(tx_id: impl Into<String>) -> Self {
        Self {
            success: true,
            tx_id: Some(tx_id.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_id: None,
            error: Some(error.into()),
        }
    }

    /// The transaction id when the adapter reported success with one.
    pub fn accepted_tx_id(&self) -> Option<&str> {
        match (self.success, self.tx_id.as_deref()) {
            (true, Some(tx)) if !tx.is_empty() => Some(tx),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    /// `None` while unconfirmed.
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxStatusReport {
    pub hash: String,
    pub status: TxStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentTransferQuery {
    pub chain: String,
    /// Signer address when known; otherwise the adapter derives it from the signing material.
    pub signer_address: Option<String>,
    pub signing_material: SigningMaterial,
    pub recipient: String,
    /// Unix seconds.
    pub since_timestamp: i64,
    pub coin: CoinKind,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub address: String,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Process-boundary command surface that signs, broadcasts and reports on
/// transactions. All signing and balance logic lives behind it.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Submits and waits for finality.
    async fn transfer_native(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError>;

    async fn transfer_token(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError>;

    /// Returns as soon as the network accepts the transaction.
    async fn transfer_native_fast(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError>;

    async fn transfer_token_fast(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError>;

    async fn check_transactions_status_batch(
        &self,
        chain: &str,
        tx_ids: &[String],
    ) -> Result<Vec<TxStatusReport>, AdapterError>;

    async fn check_recent_transfer(&self, query: &RecentTransferQuery) -> Result<bool, AdapterError>;

    async fn query_balance(&self, chain: &str, address: &str, coin: &CoinKind) -> Result<f64, AdapterError>;

    async fn query_balances_batch(
        &self,
        chain: &str,
        coin: &CoinKind,
        addresses: &[String],
    ) -> Result<Vec<BalanceReport>, AdapterError>;

    async fn get_fee_price(&self, chain: &str) -> Result<f64, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accepts_tx_hash_alias() {
        let outcome: TransferOutcome =
            serde_json::from_str(r#"{"success": true, "tx_hash": "0xfeed"}"#).unwrap();
        assert_eq!(outcome.accepted_tx_id(), Some("0xfeed"));

        let no_hash: TransferOutcome = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert_eq!(no_hash.accepted_tx_id(), None);

        let failed = TransferOutcome::rejected("insufficient funds");
        assert_eq!(failed.accepted_tx_id(), None);
    }

    #[test]
    fn test_request_serializes_send_all_sentinel() {
        let request = TransferRequest {
            chain: "eth".into(),
            item_key: ItemKey(3),
            from_addr: None,
            to_addr: "0xto".into(),
            signing_material: SigningMaterial::new("secret"),
            amount: TransferAmount::All,
            coin: CoinKind::Native { symbol: "ETH".into() },
            fee_policy: FeePolicy::default(),
            max_fee_price: Some(30.0),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["amount"], -1.0);
        assert_eq!(json["item_key"], 3);
        assert_eq!(json["coin"]["kind"], "native");
    }

    #[test]
    fn test_status_report_shape() {
        let reports: Vec<TxStatusReport> = serde_json::from_str(
            r#"[{"hash": "0x1", "status": {"confirmed": true, "success": false, "error": "reverted"}},
                {"hash": "0x2", "status": {"confirmed": false}}]"#,
        )
        .unwrap();
        assert_eq!(reports[0].status.success, Some(false));
        assert_eq!(reports[1].status.success, None);
    }
}
