use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use helmsman_core::agents::{
    AnomalyDetector, AnomalyThresholds, AgentRuntime, MarketRegimeClassifier, PortfolioOptimizer,
    RiskMonitor, SignalValidator,
};
use helmsman_core::bus::EventBus;
use helmsman_core::config::OrchestrationConfig;
use helmsman_core::domain::{EventType, OrchestrationEvent};
use helmsman_core::orchestrator::Orchestrator;
use helmsman_core::throttle::InMemoryCounter;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = OrchestrationConfig::from_env();
    let bus = Arc::new(EventBus::new(config.bus.clone()));
    let agent_config = config.agent_config();

    // Mitigation requests the anomaly detector is allowed to auto-execute
    let (mitigation_tx, mut mitigation_rx) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        while let Some(request) = mitigation_rx.recv().await {
            tracing::warn!(?request, "mitigation requested");
        }
    });

    // Assemble the agent fleet
    let agents: Vec<(&str, AgentRuntime)> = vec![
        (
            "signal_validator",
            AgentRuntime::new("signal_validator", Arc::new(SignalValidator), agent_config.clone()),
        ),
        (
            "risk_monitor",
            AgentRuntime::new("risk_monitor", Arc::new(RiskMonitor), agent_config.clone()),
        ),
        (
            "anomaly_detector",
            AgentRuntime::new(
                "anomaly_detector",
                Arc::new(
                    AnomalyDetector::new(AnomalyThresholds::default())
                        .with_auto_execute(mitigation_tx),
                ),
                agent_config.clone(),
            ),
        ),
        (
            "portfolio_optimizer",
            AgentRuntime::new(
                "portfolio_optimizer",
                Arc::new(PortfolioOptimizer),
                agent_config.clone(),
            ),
        ),
        (
            "market_regime_classifier",
            AgentRuntime::new(
                "market_regime_classifier",
                Arc::new(MarketRegimeClassifier),
                agent_config.clone(),
            ),
        ),
    ];

    let orchestrator = Arc::new(
        Orchestrator::new(config, Arc::clone(&bus)).with_counter(Arc::new(InMemoryCounter::new())),
    );
    for (agent_id, runtime) in &agents {
        runtime.start().expect("Failed to start agent");
        orchestrator.register_agent(*agent_id, runtime.clone());
    }

    // The orchestrator consumes business events off the bus
    for event_type in [
        EventType::SignalGenerated,
        EventType::AnomalyDetected,
        EventType::RebalancingDue,
        EventType::MarketDataUpdated,
    ] {
        let mut subscription = bus.subscribe(event_type, "orchestrator");
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                orchestrator.handle_event(event).await;
            }
        });
    }

    tracing::info!("helmsman core running; publishing demonstration events");

    // A confident, safe signal
    bus.publish_event(
        OrchestrationEvent::new(
            EventType::SignalGenerated,
            "strategy_engine",
            "demo-user",
            json!({
                "symbol": "BTCUSDT",
                "side": "buy",
                "size": 0.25,
                "confidence": 0.86,
                "exposure_percent": 20.0,
                "drawdown_percent": 1.0,
            }),
        )
        .with_bot_instance("bot-1"),
    )
    .await;

    // A signal that fails the confidence rule
    bus.publish_event(
        OrchestrationEvent::new(
            EventType::SignalGenerated,
            "strategy_engine",
            "demo-user",
            json!({
                "symbol": "ETHUSDT",
                "side": "sell",
                "size": 1.0,
                "confidence": 0.45,
            }),
        )
        .with_bot_instance("bot-1"),
    )
    .await;

    // A metrics sweep that raises anomalies and reclassifies the regime
    bus.publish_event(
        OrchestrationEvent::new(
            EventType::MarketDataUpdated,
            "metrics_collector",
            "demo-user",
            json!({
                "volatility_ratio": 2.4,
                "price_change_pct": -6.0,
                "trades_last_hour": 90,
                "consecutive_losses": 7,
                "bot_instance_id": "bot-1",
            }),
        )
        .with_bot_instance("bot-1"),
    )
    .await;

    // A loss beyond the configured limit trips the breaker...
    bus.publish_event(
        OrchestrationEvent::new(
            EventType::SignalGenerated,
            "risk_feed",
            "demo-user",
            json!({"daily_loss_percent": 12.0}),
        )
        .with_bot_instance("bot-1"),
    )
    .await;

    // ...and every later signal for that pair is blocked until reset.
    bus.publish_event(
        OrchestrationEvent::new(
            EventType::SignalGenerated,
            "strategy_engine",
            "demo-user",
            json!({
                "symbol": "BTCUSDT",
                "side": "buy",
                "size": 0.5,
                "confidence": 0.95,
            }),
        )
        .with_bot_instance("bot-1"),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(750)).await;

    for record in orchestrator.journal_records() {
        tracing::info!(
            event_type = %record.event_type,
            decision = %record.final_decision,
            success = record.success,
            tasks = record.tasks.len(),
            "journal entry"
        );
    }
    for (agent_id, runtime) in &agents {
        let metrics = runtime.metrics();
        tracing::info!(
            agent_id,
            total = metrics.total_tasks,
            completed = metrics.completed_tasks,
            failed = metrics.failed_tasks,
            success_rate = metrics.success_rate,
            "agent metrics"
        );
    }

    for (_, runtime) in &agents {
        runtime.stop().await.expect("Failed to stop agent");
    }
    tracing::info!("helmsman core demo complete");
}
