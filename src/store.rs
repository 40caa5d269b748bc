use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::error::StoreError;
use crate::item::{ExecStatus, ItemKey, NewTransfer, TransferItem};

/// Keyed arena of transfer items.
///
/// Every read and write resolves the target by [`ItemKey`]; callers never hold
/// a reference into the map across an await point. Status changes go through
/// the transition helpers so the lifecycle rules hold no matter which worker
/// finishes first.
#[derive(Debug, Default)]
pub struct TransferStore {
    items: DashMap<ItemKey, TransferItem>,
    next_key: AtomicU64,
}

impl TransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, new: NewTransfer) -> ItemKey {
        let key = ItemKey(self.next_key.fetch_add(1, Ordering::Relaxed) + 1);
        self.items.insert(key, TransferItem::from_new(key, new));
        key
    }

    pub fn extend<I: IntoIterator<Item = NewTransfer>>(&self, items: I) -> Vec<ItemKey> {
        items.into_iter().map(|item| self.insert(item)).collect()
    }

    /// All keys in import order.
    pub fn keys(&self) -> Vec<ItemKey> {
        let mut keys: Vec<ItemKey> = self.items.iter().map(|entry| *entry.key()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remove(&self, key: ItemKey) -> Option<TransferItem> {
        self.items.remove(&key).map(|(_, item)| item)
    }

    pub fn get_by_key(&self, key: ItemKey) -> Option<TransferItem> {
        self.items.get(&key).map(|entry| entry.value().clone())
    }

    pub fn status_of(&self, key: ItemKey) -> Option<ExecStatus> {
        self.items.get(&key).map(|entry| entry.exec_status)
    }

    /// Applies `f` to the item under the map's shard lock.
    pub fn update_by_key<F, R>(&self, key: ItemKey, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut TransferItem) -> R,
    {
        let mut entry = self.items.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        Ok(f(entry.value_mut()))
    }

    /// Display-only update; never touches status.
    pub fn set_message(&self, key: ItemKey, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        self.update_by_key(key, |item| item.error_msg = message)
    }

    pub fn mark_running(&self, key: ItemKey, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        self.transition(key, ExecStatus::Pending, ExecStatus::Running, |item| {
            item.error_msg = message;
        })
    }

    pub fn mark_success(&self, key: ItemKey, tx_id: Option<String>, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        self.transition(key, ExecStatus::Running, ExecStatus::Success, |item| {
            item.error_msg = message;
            item.tx_id = tx_id;
            item.retry_flag = false;
        })
    }

    /// Records a per-item failure. The item is flagged for retry when
    /// `error_retry` is on and its error count is still below `error_count_limit`.
    pub fn mark_failed(
        &self,
        key: ItemKey,
        reason: impl Into<String>,
        error_retry: bool,
        error_count_limit: u32,
    ) -> Result<(), StoreError> {
        let reason = reason.into();
        self.transition(key, ExecStatus::Running, ExecStatus::Failed, |item| {
            item.error_msg = reason;
            if error_retry && item.error_count < error_count_limit {
                item.error_count += 1;
                item.retry_flag = true;
            } else {
                item.retry_flag = false;
            }
        })
    }

    /// Undo of an in-flight item when the batch aborts.
    pub(crate) fn rollback_to_pending(&self, key: ItemKey) -> Result<(), StoreError> {
        self.transition(key, ExecStatus::Running, ExecStatus::Pending, |item| {
            item.error_msg.clear();
        })
    }

    /// Failed -> Pending. Only the retry verifier resets failed items.
    pub(crate) fn reset_for_retry(&self, key: ItemKey, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        self.transition(key, ExecStatus::Failed, ExecStatus::Pending, |item| {
            item.error_msg = message;
        })
    }

    /// Failed -> Success when the chain shows the transfer already landed.
    pub(crate) fn reclassify_success(&self, key: ItemKey, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        self.transition(key, ExecStatus::Failed, ExecStatus::Success, |item| {
            item.error_msg = message;
            item.retry_flag = false;
        })
    }

    fn transition<F>(&self, key: ItemKey, from: ExecStatus, to: ExecStatus, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TransferItem),
    {
        let mut entry = self.items.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        let item = entry.value_mut();
        if item.exec_status != from {
            warn!(
                "[STORE] Rejected transition for {}: {:?} -> {:?} (expected {:?})",
                key, item.exec_status, to, from
            );
            return Err(StoreError::IllegalTransition {
                key,
                from: item.exec_status,
                to,
            });
        }
        item.exec_status = to;
        apply(item);
        Ok(())
    }

    /// Keys of failed items flagged for retry, in import order.
    pub fn retryable_failures(&self, keys: &[ItemKey]) -> Vec<ItemKey> {
        keys.iter()
            .copied()
            .filter(|key| {
                self.items
                    .get(key)
                    .map(|entry| entry.is_retryable_failure())
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn count_status(&self, keys: &[ItemKey], status: ExecStatus) -> usize {
        keys.iter()
            .filter(|key| self.status_of(**key) == Some(status))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(n: usize) -> (TransferStore, Vec<ItemKey>) {
        let store = TransferStore::new();
        let keys = store.extend((0..n).map(|i| NewTransfer::new(format!("pk{}", i), format!("to{}", i))));
        (store, keys)
    }

    #[test]
    fn test_keys_are_unique_and_never_reused() {
        let (store, keys) = store_with(3);
        assert_eq!(keys, vec![ItemKey(1), ItemKey(2), ItemKey(3)]);

        store.remove(ItemKey(3));
        let next = store.insert(NewTransfer::new("pk", "to"));
        assert_eq!(next, ItemKey(4));
        assert_eq!(store.keys(), vec![ItemKey(1), ItemKey(2), ItemKey(4)]);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (store, keys) = store_with(1);
        let key = keys[0];

        // Pending cannot jump straight to a terminal state
        assert!(matches!(
            store.mark_success(key, Some("0x1".into()), "0x1"),
            Err(StoreError::IllegalTransition { .. })
        ));

        store.mark_running(key, "").unwrap();
        store.mark_success(key, Some("0xabc".into()), "0xabc").unwrap();

        let item = store.get_by_key(key).unwrap();
        assert_eq!(item.exec_status, ExecStatus::Success);
        assert_eq!(item.tx_id.as_deref(), Some("0xabc"));

        // Terminal items cannot be restarted by the scheduler
        assert!(store.mark_running(key, "").is_err());
    }

    #[test]
    fn test_failure_retry_flag_bounded_by_error_count() {
        let (store, keys) = store_with(1);
        let key = keys[0];

        for round in 1..=2 {
            store.mark_running(key, "").unwrap();
            store.mark_failed(key, "nonce too low", true, 2).unwrap();
            let item = store.get_by_key(key).unwrap();
            assert!(item.retry_flag);
            assert_eq!(item.error_count, round);
            store.reset_for_retry(key, "waiting").unwrap();
        }

        store.mark_running(key, "").unwrap();
        store.mark_failed(key, "nonce too low", true, 2).unwrap();
        let item = store.get_by_key(key).unwrap();
        assert!(!item.retry_flag);
        assert_eq!(item.error_count, 2);
    }

    #[test]
    fn test_failure_without_error_retry() {
        let (store, keys) = store_with(1);
        store.mark_running(keys[0], "").unwrap();
        store.mark_failed(keys[0], "boom", false, 3).unwrap();
        let item = store.get_by_key(keys[0]).unwrap();
        assert!(!item.retry_flag);
        assert_eq!(item.error_count, 0);
        assert_eq!(item.error_msg, "boom");
    }

    #[test]
    fn test_rollback_only_from_running() {
        let (store, keys) = store_with(1);
        assert!(store.rollback_to_pending(keys[0]).is_err());
        store.mark_running(keys[0], "submitting").unwrap();
        store.rollback_to_pending(keys[0]).unwrap();
        let item = store.get_by_key(keys[0]).unwrap();
        assert_eq!(item.exec_status, ExecStatus::Pending);
        assert!(item.error_msg.is_empty());
    }

    #[test]
    fn test_update_missing_key() {
        let (store, _) = store_with(1);
        assert_eq!(
            store.set_message(ItemKey(99), "x"),
            Err(StoreError::NotFound(ItemKey(99)))
        );
    }

    #[test]
    fn test_retryable_failures_in_key_order() {
        let (store, keys) = store_with(4);
        for key in [keys[3], keys[1]] {
            store.mark_running(key, "").unwrap();
            store.mark_failed(key, "x", true, 3).unwrap();
        }
        store.mark_running(keys[0], "").unwrap();
        store.mark_failed(keys[0], "x", false, 3).unwrap();

        assert_eq!(store.retryable_failures(&keys), vec![keys[1], keys[3]]);
        assert_eq!(store.count_status(&keys, ExecStatus::Failed), 3);
    }
}
