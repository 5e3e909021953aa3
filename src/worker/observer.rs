use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{BackendError, ComputeBackend};
use crate::config::ObserverConfig;
use crate::error::{BoquitaError, Result};
use crate::scheduler::job::{Execution, ExecutionStatus};
use crate::store::MemoryStore;

/// How an observer finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverExit {
    /// Execution reached a terminal status and the instance was released
    Completed(ExecutionStatus),
    /// Stopped by cancellation; the instance was left in place
    Cancelled,
    /// Backend reported an instance-level error; the execution keeps its last status
    InstanceError(String),
}

/// Bounded retry with a fixed backoff between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl From<&ObserverConfig> for RetryPolicy {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.retry_backoff,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Run `call` until it succeeds or the attempts are used up.
    ///
    /// Non-transient errors are returned at once. Returns `Ok(None)` when
    /// `cancel` fires first.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        mut call: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let attempts = self.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                result = call() => result,
            };

            match result {
                Ok(value) => return Ok(Some(value)),
                Err(e) if !e.is_transient() => return Err(BoquitaError::Backend(e)),
                Err(source) if attempt >= attempts => {
                    return Err(BoquitaError::RetryExhausted { attempts, source });
                }
                Err(e) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        attempts,
                        error = %e,
                        "Backend call failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }
    }
}

/// Follows one execution's instance until it stops.
///
/// Each poll persists the refreshed execution. Once it is terminal the
/// instance is deleted exactly once and the observer exits.
pub struct Observer {
    execution_id: Uuid,
    instance: String,
    executions: Arc<MemoryStore<Execution>>,
    backend: Arc<dyn ComputeBackend>,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl Observer {
    pub fn new(
        execution_id: Uuid,
        instance: impl Into<String>,
        executions: Arc<MemoryStore<Execution>>,
        backend: Arc<dyn ComputeBackend>,
        config: &ObserverConfig,
    ) -> Self {
        Self {
            execution_id,
            instance: instance.into(),
            executions,
            backend,
            poll_interval: config.poll_interval,
            retry: RetryPolicy::from(config),
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<ObserverExit> {
        tracing::debug!(
            execution_id = %self.execution_id,
            instance = %self.instance,
            "Observer started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ObserverExit::Cancelled),
                _ = ticker.tick() => {}
            }

            let report = match self
                .retry
                .run(&cancel, "get_instance", || {
                    self.backend.get_instance(&self.instance)
                })
                .await?
            {
                Some(report) => report,
                None => return Ok(ObserverExit::Cancelled),
            };

            if let Some(message) = report.error {
                tracing::warn!(
                    execution_id = %self.execution_id,
                    instance = %self.instance,
                    error = %message,
                    "Instance reported an error, stopping observer"
                );
                return Ok(ObserverExit::InstanceError(message));
            }

            let mut execution = self.executions.get(&self.execution_id).await?;
            let status = execution.apply(&report);
            self.executions.set(self.execution_id, execution).await?;

            if !status.is_terminal() {
                continue;
            }

            tracing::info!(
                execution_id = %self.execution_id,
                instance = %self.instance,
                status = %status,
                "Execution finished, releasing instance"
            );
            return match self
                .retry
                .run(&cancel, "delete_instance", || {
                    self.backend.delete_instance(&self.instance)
                })
                .await?
            {
                Some(()) => Ok(ObserverExit::Completed(status)),
                None => Ok(ObserverExit::Cancelled),
            };
        }
    }
}
