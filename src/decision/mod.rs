//! Decision logic: pure functions mapping aggregated agent outputs to one
//! final action. No I/O here so business policy stays independently
//! testable.
//!
//! Signal rules are ordered and first-match-wins; anomaly mitigation is
//! monotone in severity; anything unmatched with no explicit default is a
//! configuration defect and fails loudly.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{
    ActionOutcome, ActionResult, EventType, FinalDecision, MitigationAction, OrchestrationEvent,
    Severity, TaskOutput,
};

/// Signals below this confidence are blocked outright.
pub const MIN_CONFIDENCE: f64 = 0.60;

/// Signals below this confidence trade at half size.
pub const REDUCED_SIZE_CONFIDENCE: f64 = 0.75;

/// No rule matched and no explicit default exists — a programming or
/// configuration defect, never silently mapped to allow.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("no decision rule matched: {0}")]
    Ambiguous(String),
}

/// Outcome of reading `daily_loss_percent` from an event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum LossCheck {
    /// Payload carries no loss figure; no breaker evaluation required.
    Absent,
    /// Loss figure present and within the configured limit.
    WithinLimit(Decimal),
    /// Loss figure exceeds the limit; the breaker must trip.
    Breach(Decimal),
    /// Loss figure present but unreadable; fail closed.
    Unreadable,
}

/// Evaluates the daily-loss breaker rule against an event payload.
pub fn loss_limit_check(event: &OrchestrationEvent, limit: Decimal) -> LossCheck {
    let Some(value) = event.data.get("daily_loss_percent") else {
        return LossCheck::Absent;
    };
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64().and_then(Decimal::from_f64_retain),
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    };
    match parsed {
        Some(loss) if loss > limit => LossCheck::Breach(loss),
        Some(loss) => LossCheck::WithinLimit(loss),
        None => LossCheck::Unreadable,
    }
}

/// Maps an event and its aggregated fan-out results to a final decision.
pub fn decide(
    event: &OrchestrationEvent,
    results: &HashMap<String, ActionResult>,
) -> Result<FinalDecision, DecisionError> {
    match event.event_type {
        EventType::SignalGenerated => Ok(validate_signal(
            confidence_from(results),
            &risk_level_from(results),
        )),
        EventType::AnomalyDetected => {
            let anomaly_type = event
                .data
                .get("anomaly_type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    DecisionError::Ambiguous("anomaly event without anomaly_type".to_string())
                })?;
            let severity = event
                .data
                .get("severity")
                .and_then(|v| v.as_str())
                .and_then(Severity::parse)
                .ok_or_else(|| {
                    DecisionError::Ambiguous(format!(
                        "anomaly event {anomaly_type:?} without a recognised severity"
                    ))
                })?;
            anomaly_response(anomaly_type, severity).map(FinalDecision::from)
        }
        EventType::RebalancingDue => Ok(rebalance_decision(results)),
        EventType::MarketDataUpdated => Ok(market_data_decision(results)),
        EventType::OrchestrationCompleted => Ok(FinalDecision::NoAction),
    }
}

/// Ordered signal rules; later rules are never reached once an earlier
/// one matches.
pub fn validate_signal(confidence: f64, risk_level: &str) -> FinalDecision {
    if confidence < MIN_CONFIDENCE {
        return FinalDecision::BlockLowConfidence;
    }
    if matches!(risk_level, "high" | "critical") {
        return FinalDecision::BlockRisk;
    }
    if confidence < REDUCED_SIZE_CONFIDENCE {
        return FinalDecision::AdjustSize50;
    }
    FinalDecision::Allow
}

/// Maps `(anomaly_type, severity)` to a mitigation.
///
/// For a fixed anomaly type the action is monotonically non-decreasing in
/// severity. An unknown anomaly type has no mapping and is ambiguous.
pub fn anomaly_response(
    anomaly_type: &str,
    severity: Severity,
) -> Result<MitigationAction, DecisionError> {
    use MitigationAction::*;
    use Severity::*;

    let action = match anomaly_type {
        "excessive_trades" => match severity {
            Low | Medium => Notify,
            High => ReducePosition,
            Critical => StopBot,
        },
        "consecutive_losses" => match severity {
            Low => Notify,
            Medium => ReducePosition,
            High | Critical => StopBot,
        },
        "high_slippage" => match severity {
            Low | Medium => Notify,
            High | Critical => ReducePosition,
        },
        "api_error_rate" => match severity {
            Low | Medium => Notify,
            High | Critical => StopBot,
        },
        "daily_loss" => match severity {
            Low => Notify,
            Medium => ReducePosition,
            High => StopBot,
            Critical => LiquidateAll,
        },
        other => {
            return Err(DecisionError::Ambiguous(format!(
                "no mitigation mapping for anomaly type {other:?}"
            )))
        }
    };
    Ok(action)
}

/// Known anomaly types with mitigation mappings, for property coverage.
pub const KNOWN_ANOMALY_TYPES: [&str; 5] = [
    "excessive_trades",
    "consecutive_losses",
    "high_slippage",
    "api_error_rate",
    "daily_loss",
];

fn rebalance_decision(results: &HashMap<String, ActionResult>) -> FinalDecision {
    // Deny-leaning explicit default: any missing or failed contribution
    // defers the rebalance.
    if completed(results, "portfolio_optimizer") && completed(results, "signal_validator") {
        FinalDecision::ExecuteRebalance
    } else {
        FinalDecision::DeferRebalance
    }
}

fn market_data_decision(results: &HashMap<String, ActionResult>) -> FinalDecision {
    match results.get("anomaly_detector").map(|r| &r.outcome) {
        Some(ActionOutcome::Completed(TaskOutput::Alerts(alerts))) if !alerts.is_empty() => {
            FinalDecision::EscalateAnomalies
        }
        // Explicit default: a quiet or unavailable detector leaves the
        // sweep as a plain regime refresh.
        _ => FinalDecision::RegimeUpdated,
    }
}

/// Confidence contributed by the signal validator. A missing or failed
/// contribution is a deny input: zero confidence, never an allow.
fn confidence_from(results: &HashMap<String, ActionResult>) -> f64 {
    match results.get("signal_validator").map(|r| &r.outcome) {
        Some(ActionOutcome::Completed(TaskOutput::Verdict(verdict))) => {
            if verdict.get("valid").and_then(|v| v.as_bool()) == Some(false) {
                return 0.0;
            }
            verdict
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

/// Risk level contributed by the risk monitor; fail-safe default is
/// "critical" when the contribution is missing or failed.
fn risk_level_from(results: &HashMap<String, ActionResult>) -> String {
    match results.get("risk_monitor").map(|r| &r.outcome) {
        Some(ActionOutcome::Completed(TaskOutput::Verdict(verdict))) => verdict
            .get("risk_level")
            .and_then(|v| v.as_str())
            .unwrap_or("critical")
            .to_string(),
        _ => "critical".to_string(),
    }
}

fn completed(results: &HashMap<String, ActionResult>, agent_id: &str) -> bool {
    results
        .get(agent_id)
        .map(|r| r.outcome.is_completed())
        .unwrap_or(false)
}
