use async_trait::async_trait;
use serde_json::json;

use super::capability::TradingCapability;
use super::errors::{AgentError, AgentResult};
use crate::domain::{AgentTask, TaskOutput};

/// Maximum tolerated drift from target weight before a rebalance is
/// worth its transaction costs.
const DRIFT_TOLERANCE: f64 = 0.05;

/// Produces an equal-weight rebalancing plan for the positions in the
/// task params. Planning only; execution belongs to the trade layer, and
/// richer allocation models stay outside the core.
pub struct PortfolioOptimizer;

#[async_trait]
impl TradingCapability for PortfolioOptimizer {
    fn capability(&self) -> &'static str {
        "portfolio_optimization"
    }

    async fn process_task(&self, task: &AgentTask) -> AgentResult<TaskOutput> {
        let positions = task
            .params
            .get("positions")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                AgentError::TaskExecutionFailed("params missing positions array".to_string())
            })?;

        let values: Vec<(String, f64)> = positions
            .iter()
            .map(|p| {
                let symbol = p
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let value = p.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0);
                (symbol, value)
            })
            .collect();

        let total: f64 = values.iter().map(|(_, v)| v).sum();
        if total <= 0.0 || values.is_empty() {
            return Err(AgentError::TaskExecutionFailed(
                "portfolio has no positive value to allocate".to_string(),
            ));
        }

        let target_weight = 1.0 / values.len() as f64;
        let mut rebalance_required = false;
        let plan: Vec<serde_json::Value> = values
            .iter()
            .map(|(symbol, value)| {
                let current_weight = value / total;
                let drift = current_weight - target_weight;
                if drift.abs() > DRIFT_TOLERANCE {
                    rebalance_required = true;
                }
                json!({
                    "symbol": symbol,
                    "current_weight": current_weight,
                    "target_weight": target_weight,
                    "delta_value": (target_weight - current_weight) * total,
                })
            })
            .collect();

        tracing::debug!(
            task_id = %task.task_id,
            positions = values.len(),
            rebalance_required,
            "rebalancing plan computed"
        );

        Ok(TaskOutput::Verdict(json!({
            "rebalance_required": rebalance_required,
            "total_value": total,
            "plan": plan,
        })))
    }
}
