use chrono::{DateTime, Utc};

/// Retry rounds allowed per session.
pub const MAX_RETRY_ROUNDS: u32 = 3;

/// One top-level execute invocation. Scopes the retry-round counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    started_at: DateTime<Utc>,
    retry_round: u32,
}

impl Session {
    pub fn start() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            retry_round: 0,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Unix seconds; the lower bound for on-chain transfer lookups.
    pub fn start_timestamp(&self) -> i64 {
        self.started_at.timestamp()
    }

    pub fn retry_round(&self) -> u32 {
        self.retry_round
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_round >= MAX_RETRY_ROUNDS
    }

    /// Claims the next retry round, or `None` once the bound is reached.
    pub(crate) fn next_round(&mut self) -> Option<u32> {
        if self.retries_exhausted() {
            return None;
        }
        self.retry_round += 1;
        Some(self.retry_round)
    }
}
