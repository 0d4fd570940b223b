use async_trait::async_trait;
use serde_json::json;

use super::capability::TradingCapability;
use super::errors::AgentResult;
use crate::domain::{AgentTask, TaskOutput};

/// Classifies the current market regime from summary statistics.
///
/// Volatility dominates trend: a violent market is "volatile" whichever
/// direction it drifts. Indicator computation (RSI, EMA, ...) happens
/// upstream; this agent only maps the summary onto a regime tag.
pub struct MarketRegimeClassifier;

impl MarketRegimeClassifier {
    fn classify(volatility_ratio: f64, price_change_pct: f64) -> &'static str {
        if volatility_ratio > 2.0 {
            "volatile"
        } else if price_change_pct > 3.0 {
            "trending_up"
        } else if price_change_pct < -3.0 {
            "trending_down"
        } else {
            "ranging"
        }
    }
}

#[async_trait]
impl TradingCapability for MarketRegimeClassifier {
    fn capability(&self) -> &'static str {
        "regime_classification"
    }

    async fn process_task(&self, task: &AgentTask) -> AgentResult<TaskOutput> {
        let volatility_ratio = task
            .params
            .get("volatility_ratio")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        let price_change_pct = task
            .params
            .get("price_change_pct")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let regime = Self::classify(volatility_ratio, price_change_pct);
        tracing::debug!(task_id = %task.task_id, regime, "market regime classified");

        Ok(TaskOutput::Verdict(json!({
            "regime": regime,
            "volatility_ratio": volatility_ratio,
            "price_change_pct": price_change_pct,
        })))
    }
}
