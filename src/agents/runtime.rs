//! Generic agent runtime: lifecycle, scheduling and fault handling for any
//! capability. Concrete agents supply a [`TradingCapability`]; the runtime
//! owns the queue, the timeout boundary, retries and the self-protective
//! error circuit.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use super::capability::TradingCapability;
use super::errors::{AgentError, AgentResult};
use super::state::AgentState;
use crate::domain::{AgentTask, TaskOutcome, TaskReport};

/// Per-agent runtime tuning.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Queue capacity; submissions beyond this fail with `QueueFull`.
    pub max_queue_size: usize,
    /// Consecutive terminal failures before the agent escalates to Error.
    pub consecutive_error_threshold: u32,
    /// How long `stop()` waits for an in-flight task before detaching.
    pub stop_grace_period: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            consecutive_error_threshold: 10,
            stop_grace_period: Duration::from_secs(5),
        }
    }
}

/// Point-in-time metrics snapshot for one agent.
#[derive(Debug, Clone)]
pub struct AgentMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub success_rate: f64,
    pub avg_task_duration: Duration,
    pub uptime: Duration,
}

struct MetricsState {
    total_tasks: u64,
    completed_tasks: u64,
    failed_tasks: u64,
    cancelled_tasks: u64,
    total_task_duration: Duration,
    consecutive_failures: u32,
    started_at: Option<Instant>,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            cancelled_tasks: 0,
            total_task_duration: Duration::ZERO,
            consecutive_failures: 0,
            started_at: None,
        }
    }

    fn snapshot(&self) -> AgentMetrics {
        let terminal = self.completed_tasks + self.failed_tasks;
        let success_rate = if terminal > 0 {
            self.completed_tasks as f64 / terminal as f64
        } else {
            0.0
        };
        let avg_task_duration = if terminal > 0 {
            self.total_task_duration / terminal as u32
        } else {
            Duration::ZERO
        };
        AgentMetrics {
            total_tasks: self.total_tasks,
            completed_tasks: self.completed_tasks,
            failed_tasks: self.failed_tasks,
            cancelled_tasks: self.cancelled_tasks,
            success_rate,
            avg_task_duration,
            uptime: self.started_at.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }
}

/// A queued task plus its optional reply slot. The reply slot survives
/// retries and receives exactly one terminal report.
struct QueuedTask {
    task: AgentTask,
    reply: Option<oneshot::Sender<TaskReport>>,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: higher priority first, then lower sequence (FIFO among equals).
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

struct Inner {
    agent_id: String,
    capability: Arc<dyn TradingCapability>,
    config: AgentConfig,
    state: Mutex<AgentState>,
    queue: Mutex<QueueState>,
    wake: Notify,
    metrics: Mutex<MetricsState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one agent's runtime. Cheap to clone; all clones share the
/// same queue, state and worker.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<Inner>,
}

impl AgentRuntime {
    pub fn new(
        agent_id: impl Into<String>,
        capability: Arc<dyn TradingCapability>,
        config: AgentConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agent_id: agent_id.into(),
                capability,
                config,
                state: Mutex::new(AgentState::Idle),
                queue: Mutex::new(QueueState {
                    heap: BinaryHeap::new(),
                    next_seq: 0,
                }),
                wake: Notify::new(),
                metrics: Mutex::new(MetricsState::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    pub fn capability_tag(&self) -> &'static str {
        self.inner.capability.capability()
    }

    pub fn state(&self) -> AgentState {
        *self.inner.state.lock().expect("lock poisoned")
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.inner.metrics.lock().expect("lock poisoned").snapshot()
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().expect("lock poisoned").heap.len()
    }

    /// Starts the consumer loop. A no-op when already running; an error
    /// from any state other than Idle.
    pub fn start(&self) -> AgentResult<()> {
        {
            let mut state = self.inner.state.lock().expect("lock poisoned");
            match *state {
                AgentState::Running => return Ok(()),
                AgentState::Idle => {}
                from => {
                    return Err(AgentError::InvalidStateTransition {
                        from,
                        to: AgentState::Running,
                    })
                }
            }
            *state = AgentState::Running;
        }
        self.inner
            .metrics
            .lock()
            .expect("lock poisoned")
            .started_at = Some(Instant::now());

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { worker_loop(inner).await });
        *self.inner.worker.lock().expect("lock poisoned") = Some(handle);

        tracing::info!(agent_id = %self.inner.agent_id, "agent started");
        Ok(())
    }

    /// Enqueues a task without waiting for its result. Never blocks: a
    /// full queue fails immediately with `QueueFull`.
    pub fn submit_task(&self, task: AgentTask) -> AgentResult<()> {
        self.enqueue(task, None)
    }

    /// Enqueues a task and returns a receiver for its terminal report.
    ///
    /// Intermediate retries are never surfaced here; the receiver resolves
    /// once, when the task completes, permanently fails, or is cancelled.
    pub fn dispatch(&self, task: AgentTask) -> AgentResult<oneshot::Receiver<TaskReport>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(task, Some(tx))?;
        Ok(rx)
    }

    fn enqueue(
        &self,
        task: AgentTask,
        reply: Option<oneshot::Sender<TaskReport>>,
    ) -> AgentResult<()> {
        if self.state().is_terminal() {
            return Err(AgentError::AgentStopped(self.inner.agent_id.clone()));
        }
        {
            let mut queue = self.inner.queue.lock().expect("lock poisoned");
            if queue.heap.len() >= self.inner.config.max_queue_size {
                return Err(AgentError::QueueFull {
                    capacity: self.inner.config.max_queue_size,
                });
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.heap.push(QueuedTask { task, reply, seq });
        }
        self.inner
            .metrics
            .lock()
            .expect("lock poisoned")
            .total_tasks += 1;
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Suspends dequeuing. Queued tasks are retained; an in-flight task
    /// is not affected.
    pub fn pause(&self) -> AgentResult<()> {
        self.transition(AgentState::Paused)?;
        tracing::info!(agent_id = %self.inner.agent_id, "agent paused");
        Ok(())
    }

    pub fn resume(&self) -> AgentResult<()> {
        self.transition(AgentState::Running)?;
        self.inner.wake.notify_one();
        tracing::info!(agent_id = %self.inner.agent_id, "agent resumed");
        Ok(())
    }

    /// Operator action: clears the consecutive-failure counter and brings
    /// an Error-state agent back to Running.
    pub fn resume_from_error(&self) -> AgentResult<()> {
        {
            let mut state = self.inner.state.lock().expect("lock poisoned");
            if !state.can_transition_to(AgentState::Running) {
                return Err(AgentError::InvalidStateTransition {
                    from: *state,
                    to: AgentState::Running,
                });
            }
            *state = AgentState::Running;
        }
        self.inner
            .metrics
            .lock()
            .expect("lock poisoned")
            .consecutive_failures = 0;
        self.inner.wake.notify_one();
        tracing::warn!(agent_id = %self.inner.agent_id, "agent resumed from error state by operator");
        Ok(())
    }

    /// Graceful shutdown: lets the in-flight task finish within the grace
    /// period, then discards queued tasks as cancelled. Terminal.
    pub async fn stop(&self) -> AgentResult<()> {
        self.transition(AgentState::Stopped)?;
        self.inner.wake.notify_one();

        let worker = self.inner.worker.lock().expect("lock poisoned").take();
        if let Some(handle) = worker {
            let grace = self.inner.config.stop_grace_period;
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(
                    agent_id = %self.inner.agent_id,
                    grace_secs = grace.as_secs(),
                    "grace period elapsed; worker detached until in-flight task completes"
                );
            }
        }
        drain_cancelled(&self.inner);
        tracing::info!(agent_id = %self.inner.agent_id, "agent stopped");
        Ok(())
    }

    fn transition(&self, to: AgentState) -> AgentResult<()> {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        if !state.can_transition_to(to) {
            return Err(AgentError::InvalidStateTransition { from: *state, to });
        }
        *state = to;
        Ok(())
    }
}

async fn worker_loop(inner: Arc<Inner>) {
    tracing::debug!(agent_id = %inner.agent_id, "agent worker loop running");
    loop {
        let state = *inner.state.lock().expect("lock poisoned");
        match state {
            AgentState::Running => {}
            // Paused and Error both stop dequeuing but retain the queue.
            AgentState::Paused | AgentState::Error => {
                inner.wake.notified().await;
                continue;
            }
            AgentState::Stopped | AgentState::Idle => break,
        }

        let next = inner.queue.lock().expect("lock poisoned").heap.pop();
        match next {
            Some(item) => execute(&inner, item).await,
            None => inner.wake.notified().await,
        }
    }
    drain_cancelled(&inner);
    tracing::debug!(agent_id = %inner.agent_id, "agent worker loop exited");
}

async fn execute(inner: &Arc<Inner>, item: QueuedTask) {
    let QueuedTask {
        mut task, reply, ..
    } = item;
    let started = Instant::now();
    let run = tokio::time::timeout(task.timeout, inner.capability.process_task(&task)).await;
    let duration = started.elapsed();

    let outcome = match run {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(AgentError::TaskTimeout {
            task_id: task.task_id,
            timeout: task.timeout,
        }),
    };

    match outcome {
        Ok(output) => {
            {
                let mut metrics = inner.metrics.lock().expect("lock poisoned");
                metrics.completed_tasks += 1;
                metrics.total_task_duration += duration;
                metrics.consecutive_failures = 0;
            }
            tracing::debug!(
                agent_id = %inner.agent_id,
                task_id = %task.task_id,
                task_type = %task.task_type,
                duration_ms = duration.as_millis() as u64,
                "task completed"
            );
            if let Some(tx) = reply {
                let _ = tx.send(TaskReport {
                    task_id: task.task_id,
                    agent_id: inner.agent_id.clone(),
                    outcome: TaskOutcome::Completed(output),
                    duration,
                    attempts: task.retry_count + 1,
                });
            }
        }
        Err(err) => {
            if task.retry_count < task.max_retries {
                task.retry_count += 1;
                tracing::warn!(
                    agent_id = %inner.agent_id,
                    task_id = %task.task_id,
                    attempt = task.retry_count,
                    max_retries = task.max_retries,
                    error = %err,
                    "task failed; re-enqueueing at original priority"
                );
                // A retry re-occupies the slot its task never logically gave
                // up, so it bypasses the capacity bound.
                let mut queue = inner.queue.lock().expect("lock poisoned");
                let seq = queue.next_seq;
                queue.next_seq += 1;
                queue.heap.push(QueuedTask { task, reply, seq });
            } else {
                let consecutive = {
                    let mut metrics = inner.metrics.lock().expect("lock poisoned");
                    metrics.failed_tasks += 1;
                    metrics.total_task_duration += duration;
                    metrics.consecutive_failures += 1;
                    metrics.consecutive_failures
                };
                tracing::error!(
                    agent_id = %inner.agent_id,
                    task_id = %task.task_id,
                    attempts = task.retry_count + 1,
                    error = %err,
                    "task permanently failed"
                );
                if let Some(tx) = reply {
                    let _ = tx.send(TaskReport {
                        task_id: task.task_id,
                        agent_id: inner.agent_id.clone(),
                        outcome: TaskOutcome::Failed(err.to_string()),
                        duration,
                        attempts: task.retry_count + 1,
                    });
                }
                if consecutive >= inner.config.consecutive_error_threshold {
                    let mut state = inner.state.lock().expect("lock poisoned");
                    if state.can_transition_to(AgentState::Error) {
                        *state = AgentState::Error;
                        tracing::error!(
                            agent_id = %inner.agent_id,
                            consecutive_failures = consecutive,
                            "consecutive-failure threshold reached; agent entering error state"
                        );
                    }
                }
            }
        }
    }
}

/// Discards all queued-but-undequeued tasks, reporting each as cancelled.
/// Idempotent: both `stop()` and the exiting worker may call it.
fn drain_cancelled(inner: &Arc<Inner>) {
    let drained: Vec<QueuedTask> = {
        let mut queue = inner.queue.lock().expect("lock poisoned");
        queue.heap.drain().collect()
    };
    if drained.is_empty() {
        return;
    }
    tracing::warn!(
        agent_id = %inner.agent_id,
        discarded = drained.len(),
        "discarding queued tasks as cancelled"
    );
    let mut metrics = inner.metrics.lock().expect("lock poisoned");
    for item in drained {
        metrics.cancelled_tasks += 1;
        if let Some(tx) = item.reply {
            let _ = tx.send(TaskReport {
                task_id: item.task.task_id,
                agent_id: inner.agent_id.clone(),
                outcome: TaskOutcome::Cancelled,
                duration: Duration::ZERO,
                attempts: item.task.retry_count,
            });
        }
    }
}
