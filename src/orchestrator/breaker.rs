//! Circuit breaker registry keyed by `(user_id, bot_instance_id)`.
//!
//! A tripped entry persists until an explicit reset — never cleared as a
//! side effect of event processing.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerKey {
    pub user_id: String,
    pub bot_instance_id: Option<String>,
}

impl BreakerKey {
    pub fn new(user_id: impl Into<String>, bot_instance_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            bot_instance_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerEntry {
    pub reason: String,
    pub tripped_at: DateTime<Utc>,
}

/// Outcome of one atomic breaker evaluation.
#[derive(Debug, Clone)]
pub enum BreakerDisposition {
    /// An earlier trip is still in force.
    AlreadyTripped(BreakerEntry),
    /// This evaluation tripped the breaker.
    JustTripped(BreakerEntry),
    /// No trip in force and none warranted.
    Clear,
}

pub struct BreakerRegistry {
    entries: Mutex<HashMap<BreakerKey, BreakerEntry>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically checks the breaker and, when `trip_reason` returns a
    /// reason, trips it. The closure runs under the registry lock, so two
    /// concurrent events for the same key cannot both pass the check
    /// before either trips.
    pub fn evaluate<F>(&self, key: &BreakerKey, trip_reason: F) -> BreakerDisposition
    where
        F: FnOnce() -> Option<String>,
    {
        let mut entries = self.entries.lock().expect("lock poisoned");
        if let Some(entry) = entries.get(key) {
            return BreakerDisposition::AlreadyTripped(entry.clone());
        }
        if let Some(reason) = trip_reason() {
            let entry = BreakerEntry {
                reason: reason.clone(),
                tripped_at: Utc::now(),
            };
            entries.insert(key.clone(), entry.clone());
            tracing::error!(
                user_id = %key.user_id,
                bot_instance_id = key.bot_instance_id.as_deref().unwrap_or("-"),
                reason = %reason,
                "circuit breaker tripped"
            );
            return BreakerDisposition::JustTripped(entry);
        }
        BreakerDisposition::Clear
    }

    pub fn is_tripped(&self, key: &BreakerKey) -> bool {
        self.entries
            .lock()
            .expect("lock poisoned")
            .contains_key(key)
    }

    pub fn entry(&self, key: &BreakerKey) -> Option<BreakerEntry> {
        self.entries.lock().expect("lock poisoned").get(key).cloned()
    }

    /// Operator action; the only way a single breaker clears.
    pub fn reset(&self, key: &BreakerKey) -> bool {
        let removed = self
            .entries
            .lock()
            .expect("lock poisoned")
            .remove(key)
            .is_some();
        if removed {
            tracing::warn!(
                user_id = %key.user_id,
                bot_instance_id = key.bot_instance_id.as_deref().unwrap_or("-"),
                "circuit breaker reset"
            );
        }
        removed
    }

    /// New-trading-day reset. Returns how many entries cleared.
    pub fn reset_all(&self) -> usize {
        let mut entries = self.entries.lock().expect("lock poisoned");
        let count = entries.len();
        entries.clear();
        if count > 0 {
            tracing::warn!(cleared = count, "all circuit breakers reset");
        }
        count
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
