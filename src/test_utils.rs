//! Scripted in-memory chain adapter for engine tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::adapter::{
    BalanceReport, ChainAdapter, RecentTransferQuery, TransferOutcome, TransferRequest, TxStatus, TxStatusReport,
};
use crate::chain::TransferCommand;
use crate::config::CoinKind;
use crate::error::AdapterError;
use crate::item::ItemKey;

#[derive(Debug, Clone)]
pub struct TransferCall {
    pub key: ItemKey,
    pub signer: Option<String>,
    pub to_addr: String,
    pub command: TransferCommand,
    pub amount: f64,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
pub struct MockChainAdapter {
    fee_price: Mutex<f64>,
    fee_price_error: Mutex<bool>,
    transfer_delay: Mutex<Duration>,
    /// Per-recipient queue of scripted results; default is success.
    scripted: Mutex<HashMap<String, VecDeque<Result<TransferOutcome, AdapterError>>>>,
    calls: Mutex<Vec<TransferCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    tx_counter: AtomicUsize,
    /// Hash -> status override; default is confirmed success.
    statuses: Mutex<HashMap<String, TxStatus>>,
    never_confirm: Mutex<bool>,
    status_batches: Mutex<Vec<usize>>,
    recent_recipients: Mutex<HashSet<String>>,
    recent_errors: Mutex<HashSet<String>>,
    recent_queries: Mutex<Vec<RecentTransferQuery>>,
    balances: Mutex<HashMap<String, f64>>,
    balance_calls: AtomicUsize,
    balance_batch_calls: AtomicUsize,
    fee_price_calls: AtomicUsize,
}

impl MockChainAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fee_price(&self, price: f64) {
        *self.fee_price.lock().unwrap() = price;
    }

    pub fn set_fee_price_error(&self, failing: bool) {
        *self.fee_price_error.lock().unwrap() = failing;
    }

    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap() = delay;
    }

    pub fn script(&self, to_addr: &str, result: Result<TransferOutcome, AdapterError>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(to_addr.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn set_status(&self, tx_id: &str, status: TxStatus) {
        self.statuses.lock().unwrap().insert(tx_id.to_string(), status);
    }

    pub fn set_never_confirm(&self, value: bool) {
        *self.never_confirm.lock().unwrap() = value;
    }

    pub fn add_recent_transfer(&self, recipient: &str) {
        self.recent_recipients.lock().unwrap().insert(recipient.to_string());
    }

    pub fn fail_recent_check(&self, recipient: &str) {
        self.recent_errors.lock().unwrap().insert(recipient.to_string());
    }

    pub fn set_balance(&self, address: &str, balance: f64) {
        self.balances.lock().unwrap().insert(address.to_string(), balance);
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn status_batches(&self) -> Vec<usize> {
        self.status_batches.lock().unwrap().clone()
    }

    pub fn recent_queries(&self) -> Vec<RecentTransferQuery> {
        self.recent_queries.lock().unwrap().clone()
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn balance_batch_calls(&self) -> usize {
        self.balance_batch_calls.load(Ordering::SeqCst)
    }

    pub fn fee_price_calls(&self) -> usize {
        self.fee_price_calls.load(Ordering::SeqCst)
    }

    async fn transfer(
        &self,
        command: TransferCommand,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, AdapterError> {
        let started = Instant::now();
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let delay = *self.transfer_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(TransferCall {
            key: request.item_key,
            signer: request.from_addr.clone(),
            to_addr: request.to_addr.clone(),
            command,
            amount: request.amount.as_wire(),
            started,
            finished: Instant::now(),
        });

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&request.to_addr)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(result) => result,
            None => {
                let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
                Ok(TransferOutcome::submitted(format!("0xtx{:04}", n)))
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    async fn transfer_native(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError> {
        self.transfer(TransferCommand::Native, request).await
    }

    async fn transfer_token(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError> {
        self.transfer(TransferCommand::Token, request).await
    }

    async fn transfer_native_fast(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError> {
        self.transfer(TransferCommand::NativeFast, request).await
    }

    async fn transfer_token_fast(&self, request: &TransferRequest) -> Result<TransferOutcome, AdapterError> {
        self.transfer(TransferCommand::TokenFast, request).await
    }

    async fn check_transactions_status_batch(
        &self,
        _chain: &str,
        tx_ids: &[String],
    ) -> Result<Vec<TxStatusReport>, AdapterError> {
        self.status_batches.lock().unwrap().push(tx_ids.len());
        let never_confirm = *self.never_confirm.lock().unwrap();
        let statuses = self.statuses.lock().unwrap();
        Ok(tx_ids
            .iter()
            .map(|hash| {
                let status = statuses.get(hash).cloned().unwrap_or(if never_confirm {
                    TxStatus::default()
                } else {
                    TxStatus {
                        confirmed: true,
                        success: Some(true),
                        error: None,
                    }
                });
                TxStatusReport {
                    hash: hash.clone(),
                    status,
                }
            })
            .collect())
    }

    async fn check_recent_transfer(&self, query: &RecentTransferQuery) -> Result<bool, AdapterError> {
        self.recent_queries.lock().unwrap().push(query.clone());
        if self.recent_errors.lock().unwrap().contains(&query.recipient) {
            return Err(AdapterError::new("explorer unavailable"));
        }
        Ok(self.recent_recipients.lock().unwrap().contains(&query.recipient))
    }

    async fn query_balance(&self, _chain: &str, address: &str, _coin: &CoinKind) -> Result<f64, AdapterError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.balances
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .ok_or_else(|| AdapterError::new("unknown address"))
    }

    async fn query_balances_batch(
        &self,
        _chain: &str,
        _coin: &CoinKind,
        addresses: &[String],
    ) -> Result<Vec<BalanceReport>, AdapterError> {
        self.balance_batch_calls.fetch_add(1, Ordering::SeqCst);
        let balances = self.balances.lock().unwrap();
        Ok(addresses
            .iter()
            .map(|address| BalanceReport {
                address: address.clone(),
                balance: balances.get(address).copied(),
                error: None,
            })
            .collect())
    }

    async fn get_fee_price(&self, _chain: &str) -> Result<f64, AdapterError> {
        self.fee_price_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fee_price_error.lock().unwrap() {
            return Err(AdapterError::new("rpc timeout"));
        }
        Ok(*self.fee_price.lock().unwrap())
    }
}
