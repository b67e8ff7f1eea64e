// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry for optimistic-concurrency conflicts.
//!
//! The caller drives the loop:
//!
//! ```ignore
//! let mut attempt = policy.start();
//! loop {
//!     match try_write().await {
//!         Err(e) if e.is_conflict() && attempt.wait().await => continue,
//!         other => break other,
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Fixed-interval retry with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub interval: Duration,
    /// Time after which no further attempt is made.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given interval and timeout.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Upper bound of attempts, the first one included.
    pub fn max_attempts(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let retries = self.timeout.as_millis() / self.interval.as_millis().max(1);
        u32::try_from(retries).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// Begin a retry sequence.
    pub fn start(&self) -> RetryState {
        RetryState {
            interval: self.interval,
            deadline: Instant::now().checked_add(self.timeout),
            remaining: self.max_attempts().saturating_sub(1),
        }
    }
}

/// Progress of one retry sequence.
#[derive(Debug)]
pub struct RetryState {
    interval: Duration,
    /// `None` when the timeout is beyond the clock's range.
    deadline: Option<Instant>,
    remaining: u32,
}

impl RetryState {
    /// Sleep before the next attempt; `false` once the budget is spent.
    pub async fn wait(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        if let Some(deadline) = self.deadline {
            match Instant::now().checked_add(self.interval) {
                Some(next) if next <= deadline => {}
                _ => return false,
            }
        }
        self.remaining -= 1;
        tokio::time::sleep(self.interval).await;
        true
    }
}
