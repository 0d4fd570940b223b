use async_trait::async_trait;

use super::errors::AgentResult;
use crate::domain::{AgentTask, TaskOutput};

/// The one method a concrete agent supplies to the runtime.
///
/// Implementations are invoked inside the runtime's timeout boundary and
/// may fail with any [`super::errors::AgentError`]; the runtime owns retry
/// and escalation. Implementations must be stateless per invocation or
/// synchronize their own interior state.
#[async_trait]
pub trait TradingCapability: Send + Sync {
    /// Capability-set tag recorded in the agent registry.
    fn capability(&self) -> &'static str;

    /// Executes one task and returns its result.
    async fn process_task(&self, task: &AgentTask) -> AgentResult<TaskOutput>;
}
