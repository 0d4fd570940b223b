use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry budget for a task whose submitter did not override it.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-task execution deadline.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Scheduling priority of a task within a single agent's queue.
///
/// Higher priorities always dequeue first; tasks of equal priority
/// dequeue in submission order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// Maps an event's integer priority onto the task priority ladder.
    pub fn from_event_priority(priority: i32) -> Self {
        match priority {
            p if p >= 8 => TaskPriority::Critical,
            p if p >= 5 => TaskPriority::High,
            p if p >= 2 => TaskPriority::Normal,
            _ => TaskPriority::Low,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A unit of work submitted to an agent's queue.
///
/// # Invariants
/// - `task_id` is globally unique
/// - `retry_count` never exceeds `max_retries` for a task that terminally fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: Uuid,
    pub task_type: String,
    pub priority: TaskPriority,
    pub params: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
}

impl AgentTask {
    /// Creates a task with default priority, retry budget and timeout.
    pub fn new(task_type: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type: task_type.into(),
            priority: TaskPriority::Normal,
            params,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TASK_TIMEOUT,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Ordered anomaly severity scale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parses the wire form used in event payloads.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One alert raised by a threshold rule in the anomaly detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub anomaly_type: String,
    pub severity: Severity,
    pub message: String,
}

/// Result value produced by a capability.
///
/// Most agents return a single verdict; the anomaly detector returns a
/// list of alerts, so the runtime carries both shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutput {
    Verdict(serde_json::Value),
    Alerts(Vec<AnomalyAlert>),
}

/// Terminal fate of a dispatched task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Completed(TaskOutput),
    Failed(String),
    Cancelled,
}

impl TaskOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskOutcome::Completed(_) => "completed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

/// Final report delivered back to a dispatcher once a task reaches a
/// terminal state. Intermediate retries are visible only in logs and
/// metrics, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub agent_id: String,
    pub outcome: TaskOutcome,
    pub duration: Duration,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_defaults() {
        let task = AgentTask::new("validate_signal", serde_json::json!({}));
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(task.timeout, DEFAULT_TASK_TIMEOUT);
    }

    #[test]
    fn task_builder_overrides() {
        let task = AgentTask::new("validate_signal", serde_json::json!({}))
            .with_priority(TaskPriority::Critical)
            .with_max_retries(1)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(task.priority, TaskPriority::Critical);
        assert_eq!(task.max_retries, 1);
        assert_eq!(task.timeout, Duration::from_secs(5));
    }

    #[test]
    fn priority_order() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn priority_from_event_priority() {
        assert_eq!(TaskPriority::from_event_priority(10), TaskPriority::Critical);
        assert_eq!(TaskPriority::from_event_priority(8), TaskPriority::Critical);
        assert_eq!(TaskPriority::from_event_priority(5), TaskPriority::High);
        assert_eq!(TaskPriority::from_event_priority(3), TaskPriority::Normal);
        assert_eq!(TaskPriority::from_event_priority(0), TaskPriority::Low);
        assert_eq!(TaskPriority::from_event_priority(-1), TaskPriority::Low);
    }

    #[test]
    fn severity_order() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_parse_roundtrip() {
        for severity in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::parse(&severity.to_string()), Some(severity));
        }
        assert_eq!(Severity::parse("catastrophic"), None);
    }

    #[test]
    fn outcome_kind_labels() {
        assert_eq!(
            TaskOutcome::Completed(TaskOutput::Verdict(serde_json::json!({}))).kind(),
            "completed"
        );
        assert_eq!(TaskOutcome::Failed("boom".into()).kind(), "failed");
        assert_eq!(TaskOutcome::Cancelled.kind(), "cancelled");
    }
}
