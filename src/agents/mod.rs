// Agent subsystem
//
// The generic runtime (queue, retries, timeout boundary, error circuit)
// plus the concrete capabilities it hosts.

pub mod anomaly;
pub mod capability;
pub mod errors;
pub mod optimizer;
pub mod regime;
pub mod risk;
pub mod runtime;
pub mod state;
pub mod validator;

// Re-export main types
pub use anomaly::{AnomalyDetector, AnomalyThresholds, MitigationRequest};
pub use capability::TradingCapability;
pub use errors::{AgentError, AgentResult};
pub use optimizer::PortfolioOptimizer;
pub use regime::MarketRegimeClassifier;
pub use risk::RiskMonitor;
pub use runtime::{AgentConfig, AgentMetrics, AgentRuntime};
pub use state::AgentState;
pub use validator::SignalValidator;
