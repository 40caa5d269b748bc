use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Stop and fee-pause signals shared by every worker of one engine run.
/// Cloning yields a handle to the same signals.
#[derive(Debug, Clone, Default)]
pub struct ExecutionControl {
    stop: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. In-flight adapter calls finish; nothing new starts.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Claims the single global pause. Returns false if another worker holds it.
    pub fn try_pause(&self) -> bool {
        self.paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Sleeps for `duration` unless stopped first. Returns true if the full
    /// duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pause_holder() {
        let control = ExecutionControl::new();
        let other = control.clone();
        assert!(control.try_pause());
        assert!(!other.try_pause());
        assert!(other.is_paused());
        control.resume();
        assert!(!other.is_paused());
        assert!(other.try_pause());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_cut_short_by_stop() {
        let control = ExecutionControl::new();
        let stopper = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.stop();
        });

        let start = tokio::time::Instant::now();
        assert!(!control.sleep(Duration::from_secs(30)).await);
        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(control.is_stopped());
        // Already stopped: returns immediately
        assert!(!control.sleep(Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_stop() {
        let control = ExecutionControl::new();
        assert!(control.sleep(Duration::from_millis(250)).await);
    }
}
