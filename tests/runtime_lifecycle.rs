//! Agent runtime lifecycle scenarios
//!
//! Exercises the worker loop end to end: graceful shutdown around an
//! in-flight task, timeout-then-retry recovery, and scheduling order
//! under a mixed-priority burst.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use helmsman_core::agents::capability::TradingCapability;
use helmsman_core::agents::errors::AgentResult;
use helmsman_core::agents::runtime::{AgentConfig, AgentRuntime};
use helmsman_core::agents::AgentState;
use helmsman_core::domain::{AgentTask, TaskOutcome, TaskOutput, TaskPriority};

struct SlowCapability {
    delay: Duration,
}

#[async_trait]
impl TradingCapability for SlowCapability {
    fn capability(&self) -> &'static str {
        "slow"
    }

    async fn process_task(&self, _task: &AgentTask) -> AgentResult<TaskOutput> {
        tokio::time::sleep(self.delay).await;
        Ok(TaskOutput::Verdict(json!({"ok": true})))
    }
}

/// Sleeps past the deadline on the first call, then answers immediately.
struct SlowFirstCapability {
    calls: AtomicU32,
}

#[async_trait]
impl TradingCapability for SlowFirstCapability {
    fn capability(&self) -> &'static str {
        "slow_first"
    }

    async fn process_task(&self, _task: &AgentTask) -> AgentResult<TaskOutput> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(TaskOutput::Verdict(json!({"ok": true})))
    }
}

struct RecordingCapability {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl TradingCapability for RecordingCapability {
    fn capability(&self) -> &'static str {
        "recording"
    }

    async fn process_task(&self, task: &AgentTask) -> AgentResult<TaskOutput> {
        self.seen
            .lock()
            .expect("lock poisoned")
            .push(task.task_type.clone());
        Ok(TaskOutput::Verdict(json!({"ok": true})))
    }
}

fn config() -> AgentConfig {
    AgentConfig {
        max_queue_size: 64,
        consecutive_error_threshold: 10,
        stop_grace_period: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn graceful_stop_lets_the_in_flight_task_finish() {
    let agent = AgentRuntime::new(
        "slow",
        Arc::new(SlowCapability {
            delay: Duration::from_millis(100),
        }),
        config(),
    );
    agent.start().expect("start");

    let rx = agent
        .dispatch(AgentTask::new("in_flight", json!({})).with_timeout(Duration::from_secs(1)))
        .expect("dispatch");

    // Let the worker pick the task up, then request shutdown.
    tokio::time::sleep(Duration::from_millis(20)).await;
    agent.stop().await.expect("stop");

    let report = rx.await.expect("report");
    assert!(matches!(report.outcome, TaskOutcome::Completed(_)));
    assert_eq!(agent.state(), AgentState::Stopped);
}

#[tokio::test]
async fn timeout_then_retry_recovers_within_budget() {
    let agent = AgentRuntime::new(
        "slow_first",
        Arc::new(SlowFirstCapability {
            calls: AtomicU32::new(0),
        }),
        config(),
    );
    agent.start().expect("start");

    let rx = agent
        .dispatch(
            AgentTask::new("deadline_sensitive", json!({}))
                .with_timeout(Duration::from_millis(50))
                .with_max_retries(2),
        )
        .expect("dispatch");
    let report = rx.await.expect("report");

    // First attempt times out, second succeeds.
    assert!(matches!(report.outcome, TaskOutcome::Completed(_)));
    assert_eq!(report.attempts, 2);
    let metrics = agent.metrics();
    assert_eq!(metrics.completed_tasks, 1);
    assert_eq!(metrics.failed_tasks, 0);
    agent.stop().await.expect("stop");
}

#[tokio::test]
async fn mixed_priority_burst_preserves_priority_then_fifo() {
    let recorder = Arc::new(RecordingCapability {
        seen: Mutex::new(Vec::new()),
    });
    let agent = AgentRuntime::new("scheduler", Arc::clone(&recorder) as _, config());

    // Submit while idle so the whole burst is queued before consumption.
    let mut replies = Vec::new();
    for (name, priority) in [
        ("n1", TaskPriority::Normal),
        ("l1", TaskPriority::Low),
        ("c1", TaskPriority::Critical),
        ("n2", TaskPriority::Normal),
        ("h1", TaskPriority::High),
        ("c2", TaskPriority::Critical),
        ("l2", TaskPriority::Low),
    ] {
        replies.push(
            agent
                .dispatch(AgentTask::new(name, json!({})).with_priority(priority))
                .expect("dispatch"),
        );
    }
    agent.start().expect("start");
    for rx in replies {
        rx.await.expect("report");
    }

    let seen = recorder.seen.lock().expect("lock poisoned").clone();
    assert_eq!(seen, vec!["c1", "c2", "h1", "n1", "n2", "l1", "l2"]);
    agent.stop().await.expect("stop");
}

#[tokio::test]
async fn paused_agent_retains_work_and_stop_cancels_it() {
    let recorder = Arc::new(RecordingCapability {
        seen: Mutex::new(Vec::new()),
    });
    let agent = AgentRuntime::new("paused", Arc::clone(&recorder) as _, config());
    agent.start().expect("start");
    agent.pause().expect("pause");

    let rx_a = agent
        .dispatch(AgentTask::new("a", json!({})))
        .expect("dispatch");
    let rx_b = agent
        .dispatch(AgentTask::new("b", json!({})))
        .expect("dispatch");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(recorder.seen.lock().expect("lock poisoned").is_empty());
    assert_eq!(agent.queue_depth(), 2);

    agent.stop().await.expect("stop");

    assert_eq!(rx_a.await.expect("report").outcome, TaskOutcome::Cancelled);
    assert_eq!(rx_b.await.expect("report").outcome, TaskOutcome::Cancelled);
    assert_eq!(agent.metrics().cancelled_tasks, 2);
}
