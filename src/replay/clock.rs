//! Pacing clocks for the replay engine

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Something the replay loop can wait on between records
#[async_trait]
pub trait Clock: Send + Sync {
    /// Wait for `delta` to pass
    async fn sleep(&self, delta: Duration);
}

/// Wall-clock pacing via `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, delta: Duration) {
        tokio::time::sleep(delta).await;
    }
}

/// Logical time: records each requested delay and returns at once
///
/// Clones share the same log, so a test can keep one handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct LogicalClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order
    pub async fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().await.clone()
    }

    /// Sum of all requested delays
    pub async fn elapsed(&self) -> Duration {
        self.sleeps.lock().await.iter().sum()
    }
}

#[async_trait]
impl Clock for LogicalClock {
    async fn sleep(&self, delta: Duration) {
        self.sleeps.lock().await.push(delta);
    }
}
