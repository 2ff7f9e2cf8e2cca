//! Saga bookkeeping for the document conversions: committed steps, their
//! compensations, and per-key serialization of dedup-sensitive writes.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ApiResult, AppError};

/// Undo action for one committed step
pub type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, ApiResult<()>> + Send>;

/// Wrap an async closure as a compensation.
pub fn compensation<F, Fut>(f: F) -> Compensation
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ApiResult<()>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

struct CommittedStep {
    name: String,
    undo: Option<Compensation>,
}

pub struct SagaLog {
    saga: &'static str,
    correlation_id: Uuid,
    committed: Vec<CommittedStep>,
}

impl SagaLog {
    pub fn begin(saga: &'static str) -> Self {
        let correlation_id = Uuid::new_v4();
        info!(saga, %correlation_id, "Saga started");
        Self {
            saga,
            correlation_id,
            committed: Vec::new(),
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn completed_steps(&self) -> Vec<String> {
        self.committed.iter().map(|s| s.name.clone()).collect()
    }

    /// Run one write step. On success the step and its compensation are
    /// recorded; on failure everything committed so far is undone.
    pub async fn step<T, Fut>(&mut self, name: &str, fut: Fut, undo: Option<Compensation>) -> ApiResult<T>
    where
        Fut: Future<Output = ApiResult<T>>,
    {
        match fut.await {
            Ok(value) => {
                self.record(name, undo);
                Ok(value)
            }
            Err(err) => Err(self.abort(name, err).await),
        }
    }

    /// Like `step` for reads: nothing is recorded on success.
    pub async fn read<T, Fut>(&mut self, name: &str, fut: Fut) -> ApiResult<T>
    where
        Fut: Future<Output = ApiResult<T>>,
    {
        match fut.await {
            Ok(value) => Ok(value),
            Err(err) => Err(self.abort(name, err).await),
        }
    }

    /// Record a step whose outcome was handled by the caller.
    pub fn record(&mut self, name: &str, undo: Option<Compensation>) {
        self.committed.push(CommittedStep {
            name: name.to_string(),
            undo,
        });
    }

    /// Roll back committed steps in reverse order. Without committed steps the
    /// original error is returned unchanged.
    pub async fn abort(&mut self, failed_step: &str, source: AppError) -> AppError {
        if self.committed.is_empty() {
            warn!(saga = self.saga, correlation_id = %self.correlation_id, step = failed_step, error = %source, "Saga failed before any write");
            return source;
        }

        let completed_steps = self.completed_steps();
        let mut compensated = true;

        while let Some(step) = self.committed.pop() {
            let Some(undo) = step.undo else { continue };
            match undo().await {
                Ok(()) => info!(saga = self.saga, correlation_id = %self.correlation_id, step = %step.name, "Step compensated"),
                Err(e) => {
                    compensated = false;
                    error!(saga = self.saga, correlation_id = %self.correlation_id, step = %step.name, error = %e, "Compensation failed");
                }
            }
        }

        error!(
            saga = self.saga,
            correlation_id = %self.correlation_id,
            failed_step,
            compensated,
            error = %source,
            "Saga aborted"
        );

        AppError::PartialSagaFailure {
            saga: self.saga.to_string(),
            correlation_id: self.correlation_id,
            failed_step: failed_step.to_string(),
            completed_steps,
            compensated,
            source: Box::new(source),
        }
    }

    pub fn finish(self) {
        info!(
            saga = self.saga,
            correlation_id = %self.correlation_id,
            steps = self.committed.len(),
            "Saga completed"
        );
    }
}

/// In-process mutex per key, e.g. `company:Acme` or `invoice:<id>`.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: impl Into<String>) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            // Drop slots nobody holds or waits on
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            locks.entry(key.into()).or_default().clone()
        };
        slot.lock_owned().await
    }
}
