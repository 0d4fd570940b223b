//! Event bus: decouples producers from agent consumers.
//!
//! Delivery is at-least-once — replay re-delivers audited events, so a
//! subscriber may see the same `event_id` twice and must deduplicate.
//! Each subscriber sees its own subscribed event type in publish order;
//! there is no cross-subscriber ordering guarantee.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{EventType, OrchestrationEvent};

/// Configuration for the bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-subscriber channel capacity.
    pub queue_size: usize,
    /// Bound on each individual subscriber delivery; a slower subscriber
    /// misses the event (replay can recover it).
    pub delivery_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_size: 64,
            delivery_timeout: Duration::from_secs(2),
        }
    }
}

/// Append-only audit record of one published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub event: OrchestrationEvent,
    pub published_at: DateTime<Utc>,
}

struct SubscriberSlot {
    name: String,
    tx: mpsc::Sender<OrchestrationEvent>,
}

/// A subscriber's private, in-order stream of one event type.
pub struct Subscription {
    pub event_type: EventType,
    pub name: String,
    rx: mpsc::Receiver<OrchestrationEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<OrchestrationEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OrchestrationEvent> {
        self.rx.try_recv().ok()
    }
}

pub struct EventBus {
    config: BusConfig,
    subscribers: RwLock<HashMap<EventType, Vec<SubscriberSlot>>>,
    audit: Mutex<Vec<EventRecord>>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Registers a handler stream for one event type. Multiple handlers
    /// per type receive events independently.
    pub fn subscribe(&self, event_type: EventType, name: impl Into<String>) -> Subscription {
        let name = name.into();
        let (tx, rx) = mpsc::channel(self.config.queue_size);
        self.subscribers
            .write()
            .expect("lock poisoned")
            .entry(event_type)
            .or_default()
            .push(SubscriberSlot {
                name: name.clone(),
                tx,
            });
        tracing::debug!(subscriber = %name, event_type = %event_type, "subscriber registered");
        Subscription {
            event_type,
            name,
            rx,
        }
    }

    /// Appends the event to the audit log, then broadcasts it to all
    /// current subscribers of its type. Returns the delivered count.
    pub async fn publish_event(&self, event: OrchestrationEvent) -> usize {
        self.audit.lock().expect("lock poisoned").push(EventRecord {
            event_id: event.event_id,
            event_type: event.event_type,
            event: event.clone(),
            published_at: Utc::now(),
        });
        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            source = %event.source_agent,
            "event published"
        );
        self.deliver(&event).await
    }

    /// Re-delivers audited events of `event_type` published at or after
    /// `since`. This is the sanctioned source of duplicate deliveries.
    pub async fn replay(&self, event_type: EventType, since: DateTime<Utc>) -> usize {
        let events: Vec<OrchestrationEvent> = {
            let audit = self.audit.lock().expect("lock poisoned");
            audit
                .iter()
                .filter(|r| r.event_type == event_type && r.published_at >= since)
                .map(|r| r.event.clone())
                .collect()
        };
        let mut delivered = 0;
        for event in events {
            delivered += self.deliver(&event).await;
        }
        delivered
    }

    /// Snapshot of the append-only audit log.
    pub fn audit_log(&self) -> Vec<EventRecord> {
        self.audit.lock().expect("lock poisoned").clone()
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscribers
            .read()
            .expect("lock poisoned")
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    async fn deliver(&self, event: &OrchestrationEvent) -> usize {
        // Snapshot senders so the lock is not held across awaits.
        let slots: Vec<(String, mpsc::Sender<OrchestrationEvent>)> = {
            let subscribers = self.subscribers.read().expect("lock poisoned");
            subscribers
                .get(&event.event_type)
                .map(|slots| {
                    slots
                        .iter()
                        .map(|s| (s.name.clone(), s.tx.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut delivered = 0;
        let mut closed: Vec<String> = Vec::new();
        for (name, tx) in slots {
            match tokio::time::timeout(self.config.delivery_timeout, tx.send(event.clone())).await
            {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => {
                    tracing::warn!(
                        subscriber = %name,
                        event_id = %event.event_id,
                        "subscriber channel closed; pruning"
                    );
                    closed.push(name);
                }
                Err(_) => {
                    tracing::warn!(
                        subscriber = %name,
                        event_id = %event.event_id,
                        timeout_ms = self.config.delivery_timeout.as_millis() as u64,
                        "subscriber too slow; delivery skipped"
                    );
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().expect("lock poisoned");
            if let Some(slots) = subscribers.get_mut(&event.event_type) {
                slots.retain(|s| !closed.contains(&s.name));
            }
        }
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
