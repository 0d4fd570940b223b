use async_trait::async_trait;
use serde_json::json;

use super::capability::TradingCapability;
use super::errors::AgentResult;
use crate::domain::{AgentTask, TaskOutput};

/// Structural validation of a generated trading signal.
///
/// Confirms the signal is well-formed and passes its confidence through
/// for the decision rules; a malformed signal is reported with zero
/// confidence so downstream rules deny it.
pub struct SignalValidator;

#[async_trait]
impl TradingCapability for SignalValidator {
    fn capability(&self) -> &'static str {
        "signal_validation"
    }

    async fn process_task(&self, task: &AgentTask) -> AgentResult<TaskOutput> {
        let params = &task.params;
        let mut checks: Vec<String> = Vec::new();

        let symbol = params.get("symbol").and_then(|v| v.as_str()).unwrap_or("");
        if symbol.is_empty() {
            checks.push("missing symbol".to_string());
        }

        let side = params.get("side").and_then(|v| v.as_str()).unwrap_or("");
        if !matches!(side, "buy" | "sell") {
            checks.push(format!("invalid side {side:?}"));
        }

        let size = params.get("size").and_then(|v| v.as_f64()).unwrap_or(0.0);
        if size <= 0.0 {
            checks.push("non-positive size".to_string());
        }

        let declared_confidence = params
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let valid = checks.is_empty();
        let confidence = if valid { declared_confidence } else { 0.0 };

        if !valid {
            tracing::warn!(
                task_id = %task.task_id,
                failed_checks = checks.len(),
                "signal failed structural validation"
            );
        }

        Ok(TaskOutput::Verdict(json!({
            "valid": valid,
            "confidence": confidence,
            "symbol": symbol,
            "failed_checks": checks,
        })))
    }
}
