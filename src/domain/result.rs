use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskOutput;

/// Mitigation ladder for anomaly responses, ordered by aggressiveness.
///
/// The derived ordering is load-bearing: decision rules must map a higher
/// severity to an action that is at least as aggressive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MitigationAction {
    Notify,
    ReducePosition,
    StopBot,
    LiquidateAll,
}

impl std::fmt::Display for MitigationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MitigationAction::Notify => write!(f, "notify"),
            MitigationAction::ReducePosition => write!(f, "reduce_position"),
            MitigationAction::StopBot => write!(f, "stop_bot"),
            MitigationAction::LiquidateAll => write!(f, "liquidate_all"),
        }
    }
}

/// Closed set of final decisions an orchestration can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Allow,
    #[serde(rename = "adjust_size_50")]
    AdjustSize50,
    BlockLowConfidence,
    BlockRisk,
    BlockedCircuitBreaker,
    CircuitBreakerTripped,
    Notify,
    ReducePosition,
    StopBot,
    LiquidateAll,
    ExecuteRebalance,
    DeferRebalance,
    RegimeUpdated,
    EscalateAnomalies,
    NoAction,
    Throttled,
    DecisionFailed,
}

impl From<MitigationAction> for FinalDecision {
    fn from(action: MitigationAction) -> Self {
        match action {
            MitigationAction::Notify => FinalDecision::Notify,
            MitigationAction::ReducePosition => FinalDecision::ReducePosition,
            MitigationAction::StopBot => FinalDecision::StopBot,
            MitigationAction::LiquidateAll => FinalDecision::LiquidateAll,
        }
    }
}

impl std::fmt::Display for FinalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FinalDecision::Allow => "allow",
            FinalDecision::AdjustSize50 => "adjust_size_50",
            FinalDecision::BlockLowConfidence => "block_low_confidence",
            FinalDecision::BlockRisk => "block_risk",
            FinalDecision::BlockedCircuitBreaker => "blocked_circuit_breaker",
            FinalDecision::CircuitBreakerTripped => "circuit_breaker_tripped",
            FinalDecision::Notify => "notify",
            FinalDecision::ReducePosition => "reduce_position",
            FinalDecision::StopBot => "stop_bot",
            FinalDecision::LiquidateAll => "liquidate_all",
            FinalDecision::ExecuteRebalance => "execute_rebalance",
            FinalDecision::DeferRebalance => "defer_rebalance",
            FinalDecision::RegimeUpdated => "regime_updated",
            FinalDecision::EscalateAnomalies => "escalate_anomalies",
            FinalDecision::NoAction => "no_action",
            FinalDecision::Throttled => "throttled",
            FinalDecision::DecisionFailed => "decision_failed",
        };
        write!(f, "{label}")
    }
}

/// Per-agent result of one fan-out dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Completed(TaskOutput),
    Failed(String),
}

impl ActionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ActionOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub agent_id: String,
    pub task_id: Option<Uuid>,
    pub outcome: ActionOutcome,
    pub duration_ms: Option<u64>,
}

/// The outcome of one `handle_event` call.
///
/// Always well-formed: partial agent failures land in `errors` and as
/// failed entries in `action_results`, never as a missing result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub final_decision: FinalDecision,
    pub actions_executed: Vec<String>,
    pub action_results: HashMap<String, ActionResult>,
    pub errors: Vec<String>,
}

impl OrchestrationResult {
    /// A successful result that invoked no agents.
    pub fn decided(final_decision: FinalDecision) -> Self {
        Self {
            success: true,
            final_decision,
            actions_executed: Vec::new(),
            action_results: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}
