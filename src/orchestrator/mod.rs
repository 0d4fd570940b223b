//! Orchestrator: maps each event to a multi-agent pipeline and a decision.
//!
//! Fan-out is parallel and partial-failure tolerant; a missing or failed
//! contribution reaches the decision rules as a deny input. The breaker
//! check and trip happen atomically under one lock, and every outcome is
//! journaled and echoed back onto the bus as a derived event.

pub mod breaker;
pub mod errors;
pub mod journal;
pub mod pipeline;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinSet;

use crate::agents::runtime::AgentRuntime;
use crate::bus::EventBus;
use crate::config::OrchestrationConfig;
use crate::decision::{self, LossCheck};
use crate::domain::{
    ActionOutcome, ActionResult, AgentTask, EventType, FinalDecision, OrchestrationEvent,
    OrchestrationResult, TaskOutcome, TaskOutput, TaskPriority,
};
use crate::throttle::{CounterService, DegradedMode};

use breaker::{BreakerDisposition, BreakerEntry, BreakerKey, BreakerRegistry};
use errors::OrchestrationError;
use journal::{DecisionJournal, DecisionRecord, TaskLogEntry};

/// How many recently processed event ids the dedup map retains.
const DEDUP_CAPACITY: usize = 1024;

/// Registry entry: a runtime handle plus its capability-set tag.
#[derive(Clone)]
pub struct RegisteredAgent {
    pub runtime: AgentRuntime,
    pub capability: &'static str,
}

pub struct Orchestrator {
    config: OrchestrationConfig,
    bus: Arc<EventBus>,
    registry: RwLock<HashMap<String, RegisteredAgent>>,
    breakers: BreakerRegistry,
    journal: DecisionJournal,
    counter: Option<Arc<dyn CounterService>>,
}

impl Orchestrator {
    pub fn new(config: OrchestrationConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            bus,
            registry: RwLock::new(HashMap::new()),
            breakers: BreakerRegistry::new(),
            journal: DecisionJournal::new(DEDUP_CAPACITY),
            counter: None,
        }
    }

    /// Attaches an admission counter; throttling stays off until
    /// `throttle_limit` is also configured.
    pub fn with_counter(mut self, counter: Arc<dyn CounterService>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn register_agent(&self, agent_id: impl Into<String>, runtime: AgentRuntime) {
        let agent_id = agent_id.into();
        let capability = runtime.capability_tag();
        self.registry
            .write()
            .expect("lock poisoned")
            .insert(agent_id.clone(), RegisteredAgent {
                runtime,
                capability,
            });
        tracing::info!(agent_id = %agent_id, capability, "agent registered");
    }

    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let removed = self
            .registry
            .write()
            .expect("lock poisoned")
            .remove(agent_id)
            .is_some();
        if removed {
            tracing::info!(agent_id, "agent unregistered");
        }
        removed
    }

    pub fn registered_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self
            .registry
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        agents.sort();
        agents
    }

    /// Operator action: clears one breaker. The only per-key reset path.
    pub fn reset_breaker(&self, user_id: &str, bot_instance_id: Option<&str>) -> bool {
        self.breakers.reset(&BreakerKey::new(
            user_id,
            bot_instance_id.map(String::from),
        ))
    }

    /// New-trading-day reset of every breaker.
    pub fn reset_all_breakers(&self) -> usize {
        self.breakers.reset_all()
    }

    pub fn breaker_entry(
        &self,
        user_id: &str,
        bot_instance_id: Option<&str>,
    ) -> Option<BreakerEntry> {
        self.breakers.entry(&BreakerKey::new(
            user_id,
            bot_instance_id.map(String::from),
        ))
    }

    pub fn journal_records(&self) -> Vec<DecisionRecord> {
        self.journal.records()
    }

    /// Runs one event through breaker check, pipeline fan-out, decision
    /// and audit. Always returns a well-formed result.
    pub async fn handle_event(&self, event: OrchestrationEvent) -> OrchestrationResult {
        let started = Instant::now();

        // Consumer-side dedup: at-least-once delivery may hand us the
        // same event twice; reuse the journaled decision, no second fan-out.
        if let Some(prior) = self.journal.recall(&event.event_id) {
            tracing::debug!(
                event_id = %event.event_id,
                decision = %prior,
                "duplicate event; reusing journaled decision"
            );
            return OrchestrationResult::decided(prior);
        }

        // Admission rejections are not journaled: a retry after the
        // window must be evaluated afresh.
        if let Some(result) = self.admission_check(&event).await {
            return result;
        }

        let result = self.process(&event).await;

        let tasks: Vec<TaskLogEntry> = result
            .action_results
            .values()
            .map(|r| TaskLogEntry {
                task_id: r.task_id,
                agent_id: r.agent_id.clone(),
                outcome: match &r.outcome {
                    ActionOutcome::Completed(_) => "completed".to_string(),
                    ActionOutcome::Failed(message) => format!("failed: {message}"),
                },
                duration_ms: r.duration_ms,
            })
            .collect();
        self.journal.record(DecisionRecord {
            event_id: event.event_id,
            event_type: event.event_type,
            final_decision: result.final_decision,
            success: result.success,
            tasks,
            decided_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        // Echo a derived outcome event for downstream telemetry. Outcome
        // events themselves are not echoed again.
        if event.event_type != EventType::OrchestrationCompleted {
            let mut outcome = OrchestrationEvent::new(
                EventType::OrchestrationCompleted,
                "orchestrator",
                event.user_id.clone(),
                json!({
                    "source_event_id": event.event_id.to_string(),
                    "source_event_type": event.event_type,
                    "final_decision": result.final_decision,
                    "success": result.success,
                }),
            );
            if let Some(bot) = &event.bot_instance_id {
                outcome = outcome.with_bot_instance(bot.clone());
            }
            self.bus.publish_event(outcome).await;
        }

        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            decision = %result.final_decision,
            success = result.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "event orchestrated"
        );
        result
    }

    async fn process(&self, event: &OrchestrationEvent) -> OrchestrationResult {
        let key = BreakerKey::new(event.user_id.clone(), event.bot_instance_id.clone());
        let loss = decision::loss_limit_check(event, self.config.breaker_loss_limit_percent);

        if loss == LossCheck::Unreadable {
            if event.event_type == EventType::SignalGenerated {
                // Fail closed: a signal whose loss figure cannot be read
                // is denied rather than waved through.
                tracing::error!(
                    event_id = %event.event_id,
                    user_id = %event.user_id,
                    "daily_loss_percent unreadable; denying signal"
                );
                return OrchestrationResult::decided(FinalDecision::BlockRisk)
                    .with_error("daily_loss_percent unreadable; failing closed")
                    .failed();
            }
            tracing::warn!(
                event_id = %event.event_id,
                "ignoring unreadable daily_loss_percent on non-signal event"
            );
        }

        // Check-then-maybe-trip runs under the registry lock, so two
        // concurrent events for one (user, bot) pair cannot both pass.
        let trip_reason = match &loss {
            LossCheck::Breach(loss) => Some(format!(
                "daily loss {loss}% exceeds limit {}%",
                self.config.breaker_loss_limit_percent
            )),
            _ => None,
        };
        match self.breakers.evaluate(&key, || trip_reason) {
            BreakerDisposition::JustTripped(_) => {
                // The tripping event never fans out; a tripped breaker is
                // not second-guessed by downstream agents.
                return OrchestrationResult::decided(FinalDecision::CircuitBreakerTripped);
            }
            BreakerDisposition::AlreadyTripped(entry)
                if event.event_type == EventType::SignalGenerated =>
            {
                tracing::warn!(
                    event_id = %event.event_id,
                    user_id = %event.user_id,
                    tripped_at = %entry.tripped_at,
                    "signal blocked by tripped circuit breaker"
                );
                return OrchestrationResult::decided(FinalDecision::BlockedCircuitBreaker);
            }
            _ => {}
        }

        let pipeline = pipeline::pipeline_for(event.event_type);
        if pipeline.is_empty() {
            return OrchestrationResult::decided(FinalDecision::NoAction);
        }

        let (actions_executed, mut action_results, mut errors, join) =
            self.fan_out(event, pipeline);
        self.fan_in(join, &mut action_results, &mut errors).await;

        let (final_decision, success) = match decision::decide(event, &action_results) {
            Ok(decision) => (decision, true),
            Err(err) => {
                tracing::error!(
                    event_id = %event.event_id,
                    error = %err,
                    "decision logic could not resolve the event"
                );
                errors.push(err.to_string());
                (FinalDecision::DecisionFailed, false)
            }
        };

        if final_decision == FinalDecision::EscalateAnomalies {
            self.escalate_alerts(event, &action_results).await;
        }

        OrchestrationResult {
            success,
            final_decision,
            actions_executed,
            action_results,
            errors,
        }
    }

    /// Dispatches one task per pipeline agent, in parallel. Unregistered
    /// or unavailable agents become failed entries without enqueueing.
    #[allow(clippy::type_complexity)]
    fn fan_out(
        &self,
        event: &OrchestrationEvent,
        pipeline: &[&str],
    ) -> (
        Vec<String>,
        HashMap<String, ActionResult>,
        Vec<String>,
        JoinSet<(String, uuid::Uuid, Result<crate::domain::TaskReport, OrchestrationError>)>,
    ) {
        let mut actions_executed = Vec::new();
        let mut action_results = HashMap::new();
        let mut errors = Vec::new();
        let mut join = JoinSet::new();

        // Snapshot under the read lock; dispatch happens lock-free so a
        // concurrent register/unregister can never expose a partial entry.
        let snapshot: HashMap<String, RegisteredAgent> = {
            let registry = self.registry.read().expect("lock poisoned");
            pipeline
                .iter()
                .filter_map(|id| registry.get(*id).map(|r| ((*id).to_string(), r.clone())))
                .collect()
        };

        for agent_id in pipeline {
            let Some(registered) = snapshot.get(*agent_id) else {
                let err = OrchestrationError::CapabilityNotFound((*agent_id).to_string());
                errors.push(err.to_string());
                action_results.insert(
                    (*agent_id).to_string(),
                    failed_action(agent_id, None, err.to_string()),
                );
                continue;
            };

            let state = registered.runtime.state();
            if state.is_unavailable() {
                let err = OrchestrationError::AgentUnavailable {
                    agent_id: (*agent_id).to_string(),
                    state,
                };
                errors.push(err.to_string());
                action_results.insert(
                    (*agent_id).to_string(),
                    failed_action(agent_id, None, err.to_string()),
                );
                continue;
            }

            let task = AgentTask::new(event.event_type.to_string(), event.data.clone())
                .with_priority(TaskPriority::from_event_priority(event.priority))
                .with_timeout(self.config.task_timeout)
                .with_max_retries(self.config.max_retries);
            let task_id = task.task_id;

            match registered.runtime.dispatch(task) {
                Ok(rx) => {
                    actions_executed.push((*agent_id).to_string());
                    let agent = (*agent_id).to_string();
                    let fanout_timeout = self.config.fanout_timeout;
                    join.spawn(async move {
                        // The timeout cancels waiting for a result, not
                        // the underlying task execution.
                        let outcome = match tokio::time::timeout(fanout_timeout, rx).await {
                            Ok(Ok(report)) => Ok(report),
                            Ok(Err(_)) => Err(OrchestrationError::RegistryRace(agent.clone())),
                            Err(_) => Err(OrchestrationError::DispatchTimeout(agent.clone())),
                        };
                        (agent, task_id, outcome)
                    });
                }
                Err(source) => {
                    let err = OrchestrationError::DispatchRejected {
                        agent_id: (*agent_id).to_string(),
                        source,
                    };
                    errors.push(err.to_string());
                    action_results.insert(
                        (*agent_id).to_string(),
                        failed_action(agent_id, Some(task_id), err.to_string()),
                    );
                }
            }
        }

        (actions_executed, action_results, errors, join)
    }

    /// Awaits all dispatched results; one agent's failure never aborts
    /// collection of the others.
    async fn fan_in(
        &self,
        mut join: JoinSet<(String, uuid::Uuid, Result<crate::domain::TaskReport, OrchestrationError>)>,
        action_results: &mut HashMap<String, ActionResult>,
        errors: &mut Vec<String>,
    ) {
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((agent, task_id, Ok(report))) => {
                    let duration_ms = Some(report.duration.as_millis() as u64);
                    let outcome = match report.outcome {
                        TaskOutcome::Completed(output) => ActionOutcome::Completed(output),
                        TaskOutcome::Failed(message) => {
                            errors.push(format!("{agent}: {message}"));
                            ActionOutcome::Failed(message)
                        }
                        TaskOutcome::Cancelled => {
                            errors.push(format!("{agent}: task cancelled"));
                            ActionOutcome::Failed("task cancelled".to_string())
                        }
                    };
                    action_results.insert(
                        agent.clone(),
                        ActionResult {
                            agent_id: agent,
                            task_id: Some(task_id),
                            outcome,
                            duration_ms,
                        },
                    );
                }
                Ok((agent, task_id, Err(err))) => {
                    errors.push(err.to_string());
                    action_results.insert(
                        agent.clone(),
                        failed_action(&agent, Some(task_id), err.to_string()),
                    );
                }
                Err(join_error) => {
                    errors.push(format!("fan-out task failed: {join_error}"));
                }
            }
        }
    }

    /// Republishes each detector alert as its own AnomalyDetected event.
    async fn escalate_alerts(
        &self,
        event: &OrchestrationEvent,
        action_results: &HashMap<String, ActionResult>,
    ) {
        let Some(ActionOutcome::Completed(TaskOutput::Alerts(alerts))) = action_results
            .get(pipeline::ANOMALY_DETECTOR)
            .map(|r| &r.outcome)
        else {
            return;
        };
        for alert in alerts {
            let mut derived = OrchestrationEvent::new(
                EventType::AnomalyDetected,
                pipeline::ANOMALY_DETECTOR,
                event.user_id.clone(),
                json!({
                    "anomaly_type": alert.anomaly_type.clone(),
                    "severity": alert.severity,
                    "message": alert.message.clone(),
                }),
            )
            .with_priority(8);
            if let Some(bot) = &event.bot_instance_id {
                derived = derived.with_bot_instance(bot.clone());
            }
            tracing::warn!(
                source_event_id = %event.event_id,
                anomaly_type = %alert.anomaly_type,
                severity = %alert.severity,
                "escalating anomaly alert"
            );
            self.bus.publish_event(derived).await;
        }
    }

    async fn admission_check(&self, event: &OrchestrationEvent) -> Option<OrchestrationResult> {
        let limit = self.config.throttle_limit?;
        let counter = self.counter.as_ref()?;
        let key = format!("events:{}", event.user_id);
        match counter
            .increment_and_check(&key, limit, self.config.throttle_window)
            .await
        {
            Ok(verdict) if verdict.allowed => None,
            Ok(verdict) => {
                tracing::warn!(
                    user_id = %event.user_id,
                    retry_after_ms = verdict.retry_after.as_millis() as u64,
                    "event throttled"
                );
                Some(
                    OrchestrationResult::decided(FinalDecision::Throttled).with_error(format!(
                        "rate limit exceeded; retry after {:?}",
                        verdict.retry_after
                    )),
                )
            }
            Err(err) => match self.config.on_counter_unavailable {
                DegradedMode::Deny => {
                    tracing::error!(
                        user_id = %event.user_id,
                        error = %err,
                        "counter unavailable; denying event"
                    );
                    Some(
                        OrchestrationResult::decided(FinalDecision::Throttled)
                            .with_error(format!("{err}; denying on uncertainty"))
                            .failed(),
                    )
                }
                DegradedMode::Allow => {
                    tracing::warn!(
                        user_id = %event.user_id,
                        error = %err,
                        "counter unavailable; allowing with warning"
                    );
                    None
                }
            },
        }
    }
}

fn failed_action(agent_id: &str, task_id: Option<uuid::Uuid>, message: String) -> ActionResult {
    ActionResult {
        agent_id: agent_id.to_string(),
        task_id,
        outcome: ActionOutcome::Failed(message),
        duration_ms: None,
    }
}
