use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::state::AgentState;

/// Errors that can occur in the agent runtime
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("agent {0} is stopped and no longer accepts tasks")]
    AgentStopped(String),

    #[error("task {task_id} exceeded its {timeout:?} deadline")]
    TaskTimeout { task_id: Uuid, timeout: Duration },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: AgentState, to: AgentState },

    #[error("task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
