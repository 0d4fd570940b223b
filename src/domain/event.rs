use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of business event types routed by the bus.
///
/// Adding a variant requires also registering its pipeline in
/// `orchestrator::pipeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SignalGenerated,
    AnomalyDetected,
    RebalancingDue,
    MarketDataUpdated,
    OrchestrationCompleted,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::SignalGenerated => write!(f, "signal_generated"),
            EventType::AnomalyDetected => write!(f, "anomaly_detected"),
            EventType::RebalancingDue => write!(f, "rebalancing_due"),
            EventType::MarketDataUpdated => write!(f, "market_data_updated"),
            EventType::OrchestrationCompleted => write!(f, "orchestration_completed"),
        }
    }
}

/// An immutable business occurrence.
///
/// Created by a producer, owned by the event bus until fully processed.
/// `event_id` is the deduplication key for at-least-once delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub source_agent: String,
    pub user_id: String,
    pub bot_instance_id: Option<String>,
    pub data: serde_json::Value,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl OrchestrationEvent {
    /// Creates an event with a fresh id and normal priority.
    pub fn new(
        event_type: EventType,
        source_agent: impl Into<String>,
        user_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            source_agent: source_agent.into(),
            user_id: user_id.into(),
            bot_instance_id: None,
            data,
            priority: 5,
            created_at: Utc::now(),
        }
    }

    pub fn with_bot_instance(mut self, bot_instance_id: impl Into<String>) -> Self {
        self.bot_instance_id = Some(bot_instance_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the generated id. Used by replaying producers that carry
    /// their own ids for deduplication.
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_display() {
        assert_eq!(EventType::SignalGenerated.to_string(), "signal_generated");
        assert_eq!(EventType::AnomalyDetected.to_string(), "anomaly_detected");
        assert_eq!(EventType::RebalancingDue.to_string(), "rebalancing_due");
        assert_eq!(
            EventType::MarketDataUpdated.to_string(),
            "market_data_updated"
        );
        assert_eq!(
            EventType::OrchestrationCompleted.to_string(),
            "orchestration_completed"
        );
    }

    #[test]
    fn event_builder() {
        let event = OrchestrationEvent::new(
            EventType::SignalGenerated,
            "strategy_engine",
            "user-1",
            json!({"symbol": "BTCUSDT"}),
        )
        .with_bot_instance("bot-7")
        .with_priority(8);

        assert_eq!(event.event_type, EventType::SignalGenerated);
        assert_eq!(event.source_agent, "strategy_engine");
        assert_eq!(event.user_id, "user-1");
        assert_eq!(event.bot_instance_id.as_deref(), Some("bot-7"));
        assert_eq!(event.priority, 8);
    }

    #[test]
    fn event_ids_are_unique() {
        let a = OrchestrationEvent::new(EventType::RebalancingDue, "scheduler", "u", json!({}));
        let b = OrchestrationEvent::new(EventType::RebalancingDue, "scheduler", "u", json!({}));
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn event_id_override_for_replay() {
        let id = Uuid::new_v4();
        let event = OrchestrationEvent::new(EventType::SignalGenerated, "s", "u", json!({}))
            .with_event_id(id);
        assert_eq!(event.event_id, id);
    }
}
