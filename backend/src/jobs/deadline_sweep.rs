// Deadline Sweep Job - Emits task_deadline_missed events for overdue open tasks

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::JobResult;
use crate::store::{bounded, DocumentStore};
use crate::workflows::{RuleEngine, TriggerEvent};

pub struct DeadlineSweepJob {
    engine: Arc<RuleEngine>,
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
    /// Tasks already reported; a task fires again only after it stops being overdue
    reported: Arc<Mutex<HashSet<Uuid>>>,
}

#[derive(Debug, Default)]
pub struct SweepResult {
    pub tasks_checked: usize,
    pub events_dispatched: usize,
    pub rules_fired: usize,
    pub errors: Vec<String>,
}

impl DeadlineSweepJob {
    pub fn new(engine: Arc<RuleEngine>, store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self {
            engine,
            store,
            timeout,
            reported: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> JobResult<SweepResult> {
        let overdue = bounded(self.timeout, "list_overdue_tasks", self.store.list_overdue_tasks(now)).await?;
        let mut result = SweepResult {
            tasks_checked: overdue.len(),
            ..Default::default()
        };

        let mut reported = self.reported.lock().await;
        let still_overdue: HashSet<Uuid> = overdue.iter().map(|t| t.id).collect();
        reported.retain(|id| still_overdue.contains(id));

        let pending: Vec<_> = overdue.iter().filter(|t| !reported.contains(&t.id)).collect();

        for task in pending {
            let event = TriggerEvent::task_deadline_missed(task, now);
            match self.engine.dispatch(&event).await {
                Ok(logs) => {
                    reported.insert(task.id);
                    result.events_dispatched += 1;
                    result.rules_fired += logs.len();
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Failed to dispatch missed deadline");
                    result.errors.push(format!("task {}: {}", task.id, e));
                }
            }
        }

        info!(
            tasks_checked = result.tasks_checked,
            events_dispatched = result.events_dispatched,
            rules_fired = result.rules_fired,
            "Deadline sweep completed"
        );
        Ok(result)
    }
}
