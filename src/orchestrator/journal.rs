//! Decision journal: the append-only record of why each event resolved
//! the way it did, plus the recently-seen map backing consumer-side
//! deduplication.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{EventType, FinalDecision};

/// One fan-out dispatch as recorded for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_id: Option<Uuid>,
    pub agent_id: String,
    pub outcome: String,
    pub duration_ms: Option<u64>,
}

/// One `handle_event` outcome as recorded for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub final_decision: FinalDecision,
    pub success: bool,
    pub tasks: Vec<TaskLogEntry>,
    pub decided_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

struct SeenEvents {
    order: VecDeque<Uuid>,
    decisions: HashMap<Uuid, FinalDecision>,
    capacity: usize,
}

pub struct DecisionJournal {
    records: Mutex<Vec<DecisionRecord>>,
    seen: Mutex<SeenEvents>,
}

impl DecisionJournal {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            seen: Mutex::new(SeenEvents {
                order: VecDeque::new(),
                decisions: HashMap::new(),
                capacity: dedup_capacity.max(1),
            }),
        }
    }

    pub fn record(&self, record: DecisionRecord) {
        {
            let mut seen = self.seen.lock().expect("lock poisoned");
            if !seen.decisions.contains_key(&record.event_id) {
                seen.order.push_back(record.event_id);
                seen.decisions
                    .insert(record.event_id, record.final_decision);
                while seen.order.len() > seen.capacity {
                    if let Some(evicted) = seen.order.pop_front() {
                        seen.decisions.remove(&evicted);
                    }
                }
            }
        }
        self.records.lock().expect("lock poisoned").push(record);
    }

    /// The journaled decision for a recently seen event id, if any.
    pub fn recall(&self, event_id: &Uuid) -> Option<FinalDecision> {
        self.seen
            .lock()
            .expect("lock poisoned")
            .decisions
            .get(event_id)
            .copied()
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().expect("lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
