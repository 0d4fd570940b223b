use serde::{Deserialize, Serialize};

/// Lifecycle state of an agent runtime.
///
/// # State Transitions
/// ```text
/// Idle -> Running <-> Paused
///            |
///            +--> Error -> Running (operator resume)
///            |
/// Running/Paused/Error -> Stopped (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Constructed but not yet started
    Idle,
    /// Consumer loop is dequeuing tasks
    Running,
    /// Dequeuing suspended; queued tasks retained
    Paused,
    /// Consecutive-failure threshold breached; requires operator resume
    Error,
    /// Terminal; no transition leaves this state
    Stopped,
}

impl AgentState {
    /// Checks if a transition from the current state to `next` is legal.
    ///
    /// `Error -> Running` exists only for the explicit operator resume;
    /// nothing leaves `Stopped`.
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Error)
                | (Error, Running)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (Error, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Stopped)
    }

    /// True when the agent cannot currently execute dispatched work.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, AgentState::Error | AgentState::Stopped)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Running => write!(f, "running"),
            AgentState::Paused => write!(f, "paused"),
            AgentState::Error => write!(f, "error"),
            AgentState::Stopped => write!(f, "stopped"),
        }
    }
}
