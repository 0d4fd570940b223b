use thiserror::Error;

use crate::agents::errors::AgentError;
use crate::agents::state::AgentState;

/// Dispatch-level failures recorded per agent in `action_results`.
///
/// None of these propagate out of `handle_event` as exceptions; they
/// surface as failed entries and deny-leaning decision inputs.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("no agent registered for capability {0}")]
    CapabilityNotFound(String),

    #[error("agent {agent_id} is unavailable (state: {state})")]
    AgentUnavailable { agent_id: String, state: AgentState },

    #[error("timed out awaiting result from agent {0}")]
    DispatchTimeout(String),

    #[error("dispatch to agent {agent_id} rejected: {source}")]
    DispatchRejected {
        agent_id: String,
        #[source]
        source: AgentError,
    },

    /// Defensive: a registered agent's reply channel vanished without a
    /// report. Unreachable under the locking discipline.
    #[error("registry entry for {0} changed during dispatch")]
    RegistryRace(String),
}
