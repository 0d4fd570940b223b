//! Static per-event-type pipelines.
//!
//! Adding an event type requires registering its pipeline here; a type
//! with an empty pipeline resolves to `no_action`.

use crate::domain::EventType;

pub const SIGNAL_VALIDATOR: &str = "signal_validator";
pub const RISK_MONITOR: &str = "risk_monitor";
pub const PORTFOLIO_OPTIMIZER: &str = "portfolio_optimizer";
pub const MARKET_REGIME_CLASSIFIER: &str = "market_regime_classifier";
pub const ANOMALY_DETECTOR: &str = "anomaly_detector";

/// Ordered agent ids to invoke for one event type.
pub fn pipeline_for(event_type: EventType) -> &'static [&'static str] {
    match event_type {
        EventType::SignalGenerated => &[SIGNAL_VALIDATOR, RISK_MONITOR],
        EventType::AnomalyDetected => &[RISK_MONITOR],
        EventType::RebalancingDue => &[PORTFOLIO_OPTIMIZER, SIGNAL_VALIDATOR],
        EventType::MarketDataUpdated => &[MARKET_REGIME_CLASSIFIER, ANOMALY_DETECTOR],
        EventType::OrchestrationCompleted => &[],
    }
}
