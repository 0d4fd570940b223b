//! Environment-driven configuration with safe defaults.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::agents::runtime::AgentConfig;
use crate::bus::BusConfig;
use crate::throttle::DegradedMode;

/// Recognized tuning options for the orchestration core.
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    /// Per-agent queue bound.
    pub max_queue_size: usize,
    /// Default per-task timeout.
    pub task_timeout: Duration,
    /// Default retry budget per task.
    pub max_retries: u32,
    /// Consecutive terminal failures before an agent escalates to Error.
    pub consecutive_error_threshold: u32,
    /// Orchestrator's overall fan-in wait bound.
    pub fanout_timeout: Duration,
    /// Daily-loss percentage that trips the circuit breaker.
    pub breaker_loss_limit_percent: Decimal,
    /// Grace period `stop()` grants an in-flight task.
    pub stop_grace_period: Duration,
    /// Events per user per window; `None` disables admission throttling.
    pub throttle_limit: Option<u64>,
    pub throttle_window: Duration,
    /// Behavior when the counter backend is unavailable.
    pub on_counter_unavailable: DegradedMode,
    pub bus: BusConfig,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            task_timeout: Duration::from_secs(30),
            max_retries: 3,
            consecutive_error_threshold: 10,
            fanout_timeout: Duration::from_secs(60),
            breaker_loss_limit_percent: Decimal::from(10),
            stop_grace_period: Duration::from_secs(5),
            throttle_limit: None,
            throttle_window: Duration::from_secs(60),
            on_counter_unavailable: DegradedMode::Deny,
            bus: BusConfig::default(),
        }
    }
}

impl OrchestrationConfig {
    /// Loads configuration from `HELMSMAN_*` environment variables,
    /// keeping the default for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_queue_size: env_parse("HELMSMAN_MAX_QUEUE_SIZE").unwrap_or(defaults.max_queue_size),
            task_timeout: env_secs("HELMSMAN_TASK_TIMEOUT_SECS").unwrap_or(defaults.task_timeout),
            max_retries: env_parse("HELMSMAN_MAX_RETRIES").unwrap_or(defaults.max_retries),
            consecutive_error_threshold: env_parse("HELMSMAN_CONSECUTIVE_ERROR_THRESHOLD")
                .unwrap_or(defaults.consecutive_error_threshold),
            fanout_timeout: env_secs("HELMSMAN_FANOUT_TIMEOUT_SECS")
                .unwrap_or(defaults.fanout_timeout),
            breaker_loss_limit_percent: std::env::var("HELMSMAN_BREAKER_LOSS_LIMIT_PERCENT")
                .ok()
                .and_then(|v| Decimal::from_str(&v).ok())
                .unwrap_or(defaults.breaker_loss_limit_percent),
            stop_grace_period: env_secs("HELMSMAN_STOP_GRACE_SECS")
                .unwrap_or(defaults.stop_grace_period),
            throttle_limit: env_parse("HELMSMAN_THROTTLE_LIMIT").or(defaults.throttle_limit),
            throttle_window: env_secs("HELMSMAN_THROTTLE_WINDOW_SECS")
                .unwrap_or(defaults.throttle_window),
            on_counter_unavailable: std::env::var("HELMSMAN_THROTTLE_DEGRADED")
                .ok()
                .and_then(|v| DegradedMode::parse(&v))
                .unwrap_or(defaults.on_counter_unavailable),
            bus: BusConfig {
                queue_size: env_parse("HELMSMAN_BUS_QUEUE_SIZE").unwrap_or(defaults.bus.queue_size),
                delivery_timeout: env_secs("HELMSMAN_BUS_DELIVERY_TIMEOUT_SECS")
                    .unwrap_or(defaults.bus.delivery_timeout),
            },
        }
    }

    /// The per-agent slice of this configuration.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_queue_size: self.max_queue_size,
            consecutive_error_threshold: self.consecutive_error_threshold,
            stop_grace_period: self.stop_grace_period,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
