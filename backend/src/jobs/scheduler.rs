// Job Scheduler - Cron ticks for scheduled rules and the missed-deadline sweep

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::DeadlineSweepJob;
use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::store::{bounded, DocumentStore};
use crate::workflows::{AutomationRule, RuleEngine, TriggerEvent, TriggerType};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Workflow error: {0}")]
    WorkflowError(#[from] AppError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

const MAX_RUN_HISTORY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: usize,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Completed,
    Failed,
    PartialFailure,
}

type RunHistory = Arc<RwLock<Vec<JobExecutionLog>>>;

async fn push_run(history: &RunHistory, log: JobExecutionLog) {
    let mut logs = history.write().await;
    logs.push(log);
    // Keep only the most recent runs
    if logs.len() > MAX_RUN_HISTORY {
        logs.remove(0);
    }
}

fn finished(job_name: String, started_at: DateTime<Utc>, items: usize, errors: Vec<String>) -> JobExecutionLog {
    let completed_at = Utc::now();
    JobExecutionLog {
        id: Uuid::new_v4(),
        job_name,
        started_at,
        completed_at: Some(completed_at),
        status: if errors.is_empty() { JobStatus::Completed } else { JobStatus::PartialFailure },
        items_processed: items,
        errors,
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    }
}

fn failed(job_name: String, started_at: DateTime<Utc>, error: String) -> JobExecutionLog {
    JobExecutionLog {
        status: JobStatus::Failed,
        ..finished(job_name, started_at, 0, vec![error])
    }
}

/// Run one scheduled rule if it still exists and is active.
pub async fn run_scheduled_rule(engine: &RuleEngine, rule_id: Uuid, cron: &str) -> JobResult<bool> {
    let rule = engine.get_rule(rule_id).await?;
    if !rule.is_active {
        info!(rule_id = %rule_id, "Scheduled rule is inactive, skipping tick");
        return Ok(false);
    }

    let log = engine.run(&rule, &TriggerEvent::scheduled(rule.id, cron)).await?;
    Ok(log.execution_result.success)
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    engine: Arc<RuleEngine>,
    store: Arc<dyn DocumentStore>,
    store_timeout: Duration,
    config: SchedulerConfig,
    execution_logs: RunHistory,
    /// Rule id -> cron job id
    registered: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl JobScheduler {
    pub async fn new(
        engine: Arc<RuleEngine>,
        store: Arc<dyn DocumentStore>,
        store_timeout: Duration,
        config: SchedulerConfig,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            engine,
            store,
            store_timeout,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
            registered: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        if !self.config.enabled {
            info!("Scheduler disabled, no background jobs started");
            return Ok(());
        }

        info!("Starting background job scheduler");

        self.schedule_deadline_sweep().await?;
        let scheduled = self.schedule_rules().await?;

        self.scheduler.start().await?;

        info!(scheduled_rules = scheduled, "Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        Ok(())
    }

    /// Start firing a newly created rule. Returns false when the rule is not an
    /// active scheduled_trigger rule, the scheduler is disabled, or the rule is
    /// already registered.
    pub async fn register_rule(&self, rule: &AutomationRule) -> JobResult<bool> {
        let scheduled = rule
            .trigger
            .as_ref()
            .is_some_and(|t| t.trigger_type == TriggerType::ScheduledTrigger);
        if !self.config.enabled || !rule.is_active || !scheduled {
            return Ok(false);
        }
        self.schedule_rule(rule).await
    }

    pub async fn registered_rules(&self) -> usize {
        self.registered.read().await.len()
    }

    pub async fn recent_runs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    async fn schedule_deadline_sweep(&self) -> JobResult<()> {
        let cron_expr = self.config.deadline_sweep_cron.clone();
        let sweep = Arc::new(DeadlineSweepJob::new(
            self.engine.clone(),
            self.store.clone(),
            self.store_timeout,
        ));
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let sweep = sweep.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();
                info!("Running missed deadline sweep");

                let log = match sweep.run(started_at).await {
                    Ok(result) => finished("Deadline Sweep".to_string(), started_at, result.tasks_checked, result.errors),
                    Err(e) => {
                        error!("Deadline sweep failed: {}", e);
                        failed("Deadline Sweep".to_string(), started_at, e.to_string())
                    }
                };
                push_run(&logs, log).await;
            })
        })
        .map_err(|e| JobError::ConfigError(format!("invalid deadline sweep cron '{}': {}", cron_expr, e)))?;

        self.scheduler.add(job).await?;
        info!(cron = %self.config.deadline_sweep_cron, "Scheduled missed deadline sweep");

        Ok(())
    }

    /// One cron job per active scheduled_trigger rule. Rules stored before cron
    /// validation existed may still lack a usable expression; those are skipped
    /// with a warning.
    async fn schedule_rules(&self) -> JobResult<usize> {
        let rules = bounded(
            self.store_timeout,
            "list_active_rules",
            self.store.list_active_rules(TriggerType::ScheduledTrigger),
        )
        .await?;

        let mut scheduled = 0;
        for rule in rules {
            match self.schedule_rule(&rule).await {
                Ok(true) => scheduled += 1,
                Ok(false) => warn!(rule_id = %rule.id, "Scheduled rule not registered"),
                Err(e) => warn!(rule_id = %rule.id, error = %e, "Could not schedule rule"),
            }
        }
        Ok(scheduled)
    }

    async fn schedule_rule(&self, rule: &AutomationRule) -> JobResult<bool> {
        let Some(cron) = rule.trigger.as_ref().and_then(|t| t.config.cron.clone()) else {
            return Ok(false);
        };

        // Held across the add so concurrent registrations of one rule cannot both succeed
        let mut registered = self.registered.write().await;
        if registered.contains_key(&rule.id) {
            return Ok(false);
        }

        let engine = self.engine.clone();
        let logs = self.execution_logs.clone();
        let rule_id = rule.id;
        let job_name = format!("Rule {}", rule.name);
        let expression = cron.clone();

        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let engine = engine.clone();
            let logs = logs.clone();
            let job_name = job_name.clone();
            let expression = expression.clone();

            Box::pin(async move {
                let started_at = Utc::now();
                let log = match run_scheduled_rule(&engine, rule_id, &expression).await {
                    Ok(_) => finished(job_name, started_at, 1, Vec::new()),
                    Err(e) => {
                        error!(rule_id = %rule_id, "Scheduled rule failed: {}", e);
                        failed(job_name, started_at, e.to_string())
                    }
                };
                push_run(&logs, log).await;
            })
        })
        .map_err(|e| JobError::ConfigError(format!("invalid cron '{}': {}", cron, e)))?;

        let job_id = self.scheduler.add(job).await?;
        registered.insert(rule.id, job_id);
        info!(rule_id = %rule.id, cron = %cron, "Scheduled rule");
        Ok(true)
    }
}
