//! Anomaly detection over a bot metrics snapshot.
//!
//! Each threshold rule fires independently and contributes one alert, so a
//! single task may yield zero, one, or many alerts. With `auto_execute`
//! enabled the detector additionally requests a mitigation through its
//! channel — a separately logged side effect, distinct from alert emission.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::capability::TradingCapability;
use super::errors::AgentResult;
use crate::domain::{AgentTask, AnomalyAlert, MitigationAction, Severity, TaskOutput};

/// Thresholds for the independent anomaly rules.
#[derive(Debug, Clone)]
pub struct AnomalyThresholds {
    pub max_trades_per_hour: u64,
    pub max_consecutive_losses: u32,
    pub max_slippage_bps: f64,
    pub max_api_error_rate: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            max_trades_per_hour: 40,
            max_consecutive_losses: 5,
            max_slippage_bps: 25.0,
            max_api_error_rate: 0.10,
        }
    }
}

/// A mitigation the detector asks the platform to execute directly.
#[derive(Debug, Clone, PartialEq)]
pub struct MitigationRequest {
    pub bot_instance_id: Option<String>,
    pub action: MitigationAction,
    pub reason: String,
}

pub struct AnomalyDetector {
    thresholds: AnomalyThresholds,
    auto_execute: bool,
    mitigations: Option<mpsc::Sender<MitigationRequest>>,
}

impl AnomalyDetector {
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        Self {
            thresholds,
            auto_execute: false,
            mitigations: None,
        }
    }

    /// Authorizes direct mitigation requests through `mitigations`.
    pub fn with_auto_execute(mut self, mitigations: mpsc::Sender<MitigationRequest>) -> Self {
        self.auto_execute = true;
        self.mitigations = Some(mitigations);
        self
    }

    /// Evaluates every rule against the snapshot. Stateless per call.
    fn evaluate(&self, params: &serde_json::Value) -> Vec<AnomalyAlert> {
        let t = &self.thresholds;
        let mut alerts = Vec::new();

        // 1) Trade churn: runaway loops show up as trade-count spikes.
        let trades = params
            .get("trades_last_hour")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if trades > t.max_trades_per_hour {
            let severity = if trades > t.max_trades_per_hour * 3 {
                Severity::Critical
            } else if trades > t.max_trades_per_hour * 2 {
                Severity::High
            } else {
                Severity::Medium
            };
            alerts.push(AnomalyAlert {
                anomaly_type: "excessive_trades".to_string(),
                severity,
                message: format!(
                    "{trades} trades in the last hour (limit {})",
                    t.max_trades_per_hour
                ),
            });
        }

        // 2) Losing streak.
        let losses = params
            .get("consecutive_losses")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        if losses >= t.max_consecutive_losses {
            let severity = if losses >= t.max_consecutive_losses * 2 {
                Severity::Critical
            } else {
                Severity::High
            };
            alerts.push(AnomalyAlert {
                anomaly_type: "consecutive_losses".to_string(),
                severity,
                message: format!(
                    "{losses} consecutive losing trades (limit {})",
                    t.max_consecutive_losses
                ),
            });
        }

        // 3) Execution quality: sustained slippage above budget.
        let slippage = params
            .get("avg_slippage_bps")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        if slippage > t.max_slippage_bps {
            let severity = if slippage > t.max_slippage_bps * 2.0 {
                Severity::High
            } else {
                Severity::Medium
            };
            alerts.push(AnomalyAlert {
                anomaly_type: "high_slippage".to_string(),
                severity,
                message: format!(
                    "average slippage {slippage:.1} bps (limit {:.1})",
                    t.max_slippage_bps
                ),
            });
        }

        // 4) Exchange connectivity.
        let error_rate = params
            .get("api_error_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        if error_rate > t.max_api_error_rate {
            let severity = if error_rate > t.max_api_error_rate * 3.0 {
                Severity::Critical
            } else {
                Severity::High
            };
            alerts.push(AnomalyAlert {
                anomaly_type: "api_error_rate".to_string(),
                severity,
                message: format!(
                    "API error rate {:.0}% (limit {:.0}%)",
                    error_rate * 100.0,
                    t.max_api_error_rate * 100.0
                ),
            });
        }

        alerts
    }

    async fn maybe_mitigate(&self, task: &AgentTask, alerts: &[AnomalyAlert]) {
        if !self.auto_execute {
            return;
        }
        let Some(worst) = alerts.iter().map(|a| a.severity).max() else {
            return;
        };
        if worst < Severity::High {
            return;
        }
        let action = if worst == Severity::Critical {
            MitigationAction::StopBot
        } else {
            MitigationAction::ReducePosition
        };
        let bot_instance_id = task
            .params
            .get("bot_instance_id")
            .and_then(|v| v.as_str())
            .map(String::from);
        let request = MitigationRequest {
            bot_instance_id: bot_instance_id.clone(),
            action,
            reason: format!("{} alert(s), worst severity {worst}", alerts.len()),
        };
        tracing::warn!(
            task_id = %task.task_id,
            bot_instance_id = bot_instance_id.as_deref().unwrap_or("-"),
            action = %action,
            "auto-executing mitigation request"
        );
        if let Some(tx) = &self.mitigations {
            if tx.send(request).await.is_err() {
                tracing::error!(
                    task_id = %task.task_id,
                    "mitigation channel closed; request dropped"
                );
            }
        }
    }
}

#[async_trait]
impl TradingCapability for AnomalyDetector {
    fn capability(&self) -> &'static str {
        "anomaly_detection"
    }

    async fn process_task(&self, task: &AgentTask) -> AgentResult<TaskOutput> {
        let alerts = self.evaluate(&task.params);
        if !alerts.is_empty() {
            tracing::info!(
                task_id = %task.task_id,
                alert_count = alerts.len(),
                "anomaly rules fired"
            );
        }
        self.maybe_mitigate(task, &alerts).await;
        Ok(TaskOutput::Alerts(alerts))
    }
}
