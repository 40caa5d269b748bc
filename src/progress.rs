use serde::Serialize;

use crate::item::{ExecStatus, ItemKey};
use crate::store::TransferStore;

/// Aggregate counts for one set of items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub completed: usize,
    pub percent: f64,
}

impl Progress {
    pub fn snapshot(store: &TransferStore, keys: &[ItemKey]) -> Self {
        let mut progress = Progress {
            total: keys.len(),
            ..Default::default()
        };
        for key in keys {
            match store.status_of(*key) {
                Some(ExecStatus::Pending) => progress.pending += 1,
                Some(ExecStatus::Running) => progress.running += 1,
                Some(ExecStatus::Success) => progress.success += 1,
                Some(ExecStatus::Failed) => progress.failed += 1,
                None => {}
            }
        }
        progress.completed = progress.success + progress.failed;
        progress.percent = if progress.total == 0 {
            0.0
        } else {
            ((progress.completed as f64 / progress.total as f64) * 10_000.0).round() / 100.0
        };
        progress
    }

    pub fn is_finished(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NewTransfer;

    #[test]
    fn test_snapshot_counts() {
        let store = TransferStore::new();
        let keys = store.extend((0..3).map(|i| NewTransfer::new(format!("pk{}", i), "to")));

        store.mark_running(keys[0], "").unwrap();
        store.mark_success(keys[0], Some("0x1".into()), "0x1").unwrap();
        store.mark_running(keys[1], "").unwrap();

        let progress = Progress::snapshot(&store, &keys);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.success, 1);
        assert_eq!(progress.running, 1);
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.percent, 33.33);
        assert!(!progress.is_finished());
    }

    #[test]
    fn test_empty_snapshot() {
        let store = TransferStore::new();
        let progress = Progress::snapshot(&store, &[]);
        assert_eq!(progress.percent, 0.0);
        assert!(progress.is_finished());
    }
}
