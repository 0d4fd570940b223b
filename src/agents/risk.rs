use async_trait::async_trait;
use serde_json::json;

use super::capability::TradingCapability;
use super::errors::AgentResult;
use crate::domain::{AgentTask, TaskOutput};

/// Portfolio risk posture from exposure and drawdown inputs.
///
/// The ladder below maps worst-of to a `risk_level` tag consumed by the
/// signal decision rules. Detailed risk models live outside the core.
pub struct RiskMonitor;

impl RiskMonitor {
    fn risk_level(exposure_percent: f64, drawdown_percent: f64) -> &'static str {
        if drawdown_percent >= 15.0 || exposure_percent >= 90.0 {
            "critical"
        } else if drawdown_percent >= 10.0 || exposure_percent >= 75.0 {
            "high"
        } else if drawdown_percent >= 5.0 || exposure_percent >= 50.0 {
            "elevated"
        } else {
            "safe"
        }
    }
}

#[async_trait]
impl TradingCapability for RiskMonitor {
    fn capability(&self) -> &'static str {
        "risk_monitoring"
    }

    async fn process_task(&self, task: &AgentTask) -> AgentResult<TaskOutput> {
        let exposure = task
            .params
            .get("exposure_percent")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let drawdown = task
            .params
            .get("drawdown_percent")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let risk_level = Self::risk_level(exposure, drawdown);
        if risk_level != "safe" {
            tracing::info!(
                task_id = %task.task_id,
                risk_level,
                exposure_percent = exposure,
                drawdown_percent = drawdown,
                "elevated risk posture"
            );
        }

        Ok(TaskOutput::Verdict(json!({
            "risk_level": risk_level,
            "exposure_percent": exposure,
            "drawdown_percent": drawdown,
        })))
    }
}
