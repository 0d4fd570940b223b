//! Counter-service contract used for request admission.
//!
//! The orchestrator depends only on this narrow interface; the backing
//! implementation (shared in-memory counter here, a distributed store in
//! production) is swappable without touching orchestration logic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter backend unavailable: {0}")]
    Unavailable(String),
}

/// Result of one `increment_and_check` call.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterVerdict {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after: Duration,
}

/// Narrow admission-counter interface.
#[async_trait]
pub trait CounterService: Send + Sync {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<CounterVerdict, CounterError>;
}

/// Behavior when the counter backend is unavailable. Deny-on-uncertainty
/// suits safety-critical checks; allow-with-warning suits best-effort
/// throttling. A configuration option, never hardcoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedMode {
    Deny,
    Allow,
}

impl DegradedMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deny" => Some(DegradedMode::Deny),
            "allow" => Some(DegradedMode::Allow),
            _ => None,
        }
    }
}

struct Window {
    started: Instant,
    count: u64,
}

/// Fixed-window in-memory counter, the default backing implementation.
pub struct InMemoryCounter {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryCounter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterService for InMemoryCounter {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<CounterVerdict, CounterError> {
        let mut windows = self.windows.lock().expect("lock poisoned");
        let now = Instant::now();
        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;

        let allowed = entry.count <= limit;
        let retry_after = if allowed {
            Duration::ZERO
        } else {
            window.saturating_sub(now.duration_since(entry.started))
        };
        Ok(CounterVerdict {
            allowed,
            remaining: limit.saturating_sub(entry.count),
            retry_after,
        })
    }
}
