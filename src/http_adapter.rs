use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::adapter::{
    BalanceReport, ChainAdapter, RecentTransferQuery, TransferOutcome, TransferRequest, TxStatusReport,
};
use crate::config::CoinKind;
use crate::error::AdapterError;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct HttpAdapterSettings {
    pub base_url: String,
    /// Requests per second.
    pub rate_limit: u32,
    pub request_timeout: Duration,
}

impl Default for HttpAdapterSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8645".to_string(),
            rate_limit: 10,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Chain adapter backed by a signing sidecar speaking JSON over HTTP.
///
/// Each command is a `POST <base_url>/<command>`. A non-2xx response carries
/// the error message as its body, which is passed through verbatim so the
/// reserved fee-ceiling signal survives the hop.
pub struct HttpChainAdapter {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

#[derive(Serialize)]
struct StatusBatchBody<'a> {
    chain: &'a str,
    tx_hashes: &'a [String],
}

#[derive(Serialize)]
struct BalanceBody<'a> {
    chain: &'a str,
    address: &'a str,
    coin: &'a CoinKind,
}

#[derive(Serialize)]
struct BalanceBatchBody<'a> {
    chain: &'a str,
    coin: &'a CoinKind,
    addresses: &'a [String],
}

#[derive(Serialize)]
struct ChainBody<'a> {
    chain: &'a str,
}

#[derive(Deserialize)]
struct RecentTransferResult {
    has_recent_transfer: bool,
    #[serde(default)]
    transaction_count: u64,
    #[serde(default)]
    latest_transaction_hash: Option<String>,
}

#[derive(Deserialize)]
struct BalanceResult {
    balance: f64,
}

#[derive(Deserialize)]
struct FeePriceResult {
    price: f64,
}

impl HttpChainAdapter {
    pub fn new(settings: HttpAdapterSettings) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| AdapterError::new(format!("failed to build http client: {}", e)))?;

        let per_second = NonZeroU32::new(settings.rate_limit.max(1)).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    async fn call<B, R>(&self, command: &str, body: &B) -> Result<R, AdapterError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, command);
        let mut retries = 0;

        loop {
            self.rate_limiter.until_ready().await;

            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| AdapterError::new(format!("{} request failed: {}", command, e)))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RATE_LIMIT_RETRIES {
                let wait_time = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(extract_retry_after)
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| Duration::from_secs(2_u64.pow(retries.min(4))));
                warn!("[ADAPTER] {} rate limited, waiting {:?}", command, wait_time);
                sleep(wait_time).await;
                retries += 1;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let message = if text.trim().is_empty() {
                    format!("{} failed with HTTP {}", command, status)
                } else {
                    text.trim().to_string()
                };
                debug!("[ADAPTER] {} -> {}: {}", command, status, message);
                return Err(AdapterError::new(message));
            }

            return response
                .json::<R>()
                .await
                .map_err(|e| AdapterError::new(format!("{} returned malformed response: {}", command, e)));
        }
    }
}

#[async_trait]
impl ChainAdapter for HttpChainAdapter {
    async fn transfer_native(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError> {
        self.call("transfer_native", request).await
    }

    async fn transfer_token(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError> {
        self.call("transfer_token", request).await
    }

    async fn transfer_native_fast(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError> {
        self.call("transfer_native_fast", request).await
    }

    async fn transfer_token_fast(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError> {
        self.call("transfer_token_fast", request).await
    }

    async fn check_transactions_status_batch(
        &self,
        chain: &str,
        tx_ids: &[String],
    ) -> Result<Vec<TxStatusReport>, AdapterError> {
        self.call(
            "check_transactions_status_batch",
            &StatusBatchBody {
                chain,
                tx_hashes: tx_ids,
            },
        )
        .await
    }

    async fn check_recent_transfer(&self, query: &RecentTransferQuery) -> Result<bool, AdapterError> {
        let result: RecentTransferResult = self.call("check_recent_transfer", query).await?;
        if result.has_recent_transfer {
            debug!(
                "[ADAPTER] {} recent transfer(s) to {}, latest {:?}",
                result.transaction_count, query.recipient, result.latest_transaction_hash
            );
        }
        Ok(result.has_recent_transfer)
    }

    async fn query_balance(&self, chain: &str, address: &str, coin: &CoinKind) -> Result<f64, AdapterError> {
        let result: BalanceResult = self
            .call("query_balance", &BalanceBody { chain, address, coin })
            .await?;
        Ok(result.balance)
    }

    async fn query_balances_batch(
        &self,
        chain: &str,
        coin: &CoinKind,
        addresses: &[String],
    ) -> Result<Vec<BalanceReport>, AdapterError> {
        self.call(
            "query_balances_batch",
            &BalanceBatchBody {
                chain,
                coin,
                addresses,
            },
        )
        .await
    }

    async fn get_fee_price(&self, chain: &str) -> Result<f64, AdapterError> {
        let result: FeePriceResult = self.call("get_fee_price", &ChainBody { chain }).await?;
        Ok(result.price)
    }
}

fn extract_retry_after(value: &str) -> Option<u64> {
    let digits: String = value.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FEE_CEILING_EXCEEDED_SIGNAL;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response per entry, in order, and returns the base url.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut buf).await;
                let reason = if status == 200 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    fn adapter(base_url: String) -> HttpChainAdapter {
        HttpChainAdapter::new(HttpAdapterSettings {
            base_url,
            rate_limit: 100,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(extract_retry_after("5"), Some(5));
        assert_eq!(extract_retry_after(" 12 "), Some(12));
        assert_eq!(extract_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_fee_price_roundtrip() {
        let url = serve(vec![(200, r#"{"price": 21.5}"#)]).await;
        let price = adapter(url).get_fee_price("eth").await.unwrap();
        assert_eq!(price, 21.5);
    }

    #[tokio::test]
    async fn test_error_body_passes_fatal_signal_through() {
        let url = serve(vec![(500, FEE_CEILING_EXCEEDED_SIGNAL)]).await;
        let err = adapter(url).get_fee_price("eth").await.unwrap_err();
        assert!(err.is_fee_ceiling_exceeded());
    }

    #[tokio::test]
    async fn test_recent_transfer_result() {
        let url = serve(vec![(
            200,
            r#"{"has_recent_transfer": true, "transaction_count": 1, "latest_transaction_hash": "0xabc"}"#,
        )])
        .await;
        let query = RecentTransferQuery {
            chain: "eth".into(),
            signer_address: Some("0xfrom".into()),
            signing_material: crate::item::SigningMaterial::new("pk"),
            recipient: "0xto".into(),
            since_timestamp: 1_700_000_000,
            coin: CoinKind::Native { symbol: "ETH".into() },
            amount: Some(1.0),
        };
        assert!(adapter(url).check_recent_transfer(&query).await.unwrap());
    }
}
