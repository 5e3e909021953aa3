use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{ComputeBackend, CreateInstanceRequest};
use crate::config::ObserverConfig;
use crate::error::Result;
use crate::scheduler::job::{Execution, Job};
use crate::scheduler::queue::WorkQueue;
use crate::store::MemoryStore;
use crate::worker::observer::Observer;
use crate::worker::registry::ObserverRegistry;

/// Drains the work queue and turns each job into a running execution.
///
/// On every tick at most one job is taken from the queue, an instance is
/// created for it, a RUNNING execution is persisted and an observer is
/// spawned to follow it. A failure with one job is logged and the loop moves
/// on to the next.
pub struct Executor {
    queue: Arc<WorkQueue<Job>>,
    executions: Arc<MemoryStore<Execution>>,
    backend: Arc<dyn ComputeBackend>,
    observers: Arc<ObserverRegistry>,
    dispatch_interval: Duration,
    observer_config: ObserverConfig,
}

impl Executor {
    pub fn new(
        queue: Arc<WorkQueue<Job>>,
        executions: Arc<MemoryStore<Execution>>,
        backend: Arc<dyn ComputeBackend>,
        observers: Arc<ObserverRegistry>,
        dispatch_interval: Duration,
        observer_config: ObserverConfig,
    ) -> Self {
        Self {
            queue,
            executions,
            backend,
            observers,
            dispatch_interval,
            observer_config,
        }
    }

    /// Instance name for one execution of `job`.
    pub fn instance_name(job: &Job, execution_id: &Uuid) -> String {
        format!("{}-{}", job.name, execution_id.simple())
    }

    pub fn instance_request(job: &Job, execution_id: &Uuid) -> CreateInstanceRequest {
        let manifest = &job.manifest;
        CreateInstanceRequest {
            name: Self::instance_name(job, execution_id),
            image: manifest.image.clone(),
            entrypoint: manifest.entrypoint.clone(),
            args: manifest.args.clone(),
            env: manifest.env.clone(),
            memory_mb: manifest.memory_mb,
            autostart: true,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.dispatch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            backend = self.backend.kind(),
            interval_ms = self.dispatch_interval.as_millis() as u64,
            "Executor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.observers.is_full() {
                tracing::debug!(
                    observers = self.observers.len(),
                    "Observer limit reached, deferring dispatch"
                );
                continue;
            }

            let Some(job) = self.queue.try_pull().await else {
                continue;
            };

            let job_id = job.id;
            match self.dispatch(job).await {
                Ok(execution_id) => {
                    tracing::info!(job_id = %job_id, execution_id = %execution_id, "Job dispatched");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to dispatch job");
                }
            }
        }

        tracing::info!("Executor stopped");
    }

    /// Create an instance for `job`, persist its execution and start observing it.
    pub async fn dispatch(&self, job: Job) -> Result<Uuid> {
        let execution_id = Uuid::new_v4();
        let request = Self::instance_request(&job, &execution_id);
        tracing::debug!(
            job_id = %job.id,
            instance_name = %request.name,
            image = %request.image,
            "Creating instance"
        );

        let created = self.backend.create_instance(&request).await?;
        if let Some(handle) = created.handle.as_deref().filter(|_| !created.errors.is_empty()) {
            // Partially provisioned: the instance exists but will never be observed
            self.release(handle).await;
        }
        let handle = created.into_handle()?;

        let execution = Execution::running(execution_id, job.id, handle.clone(), request.name);
        if let Err(e) = self.executions.set(execution_id, execution).await {
            self.release(&handle).await;
            return Err(e);
        }

        let observer = Observer::new(
            execution_id,
            handle.clone(),
            self.executions.clone(),
            self.backend.clone(),
            &self.observer_config,
        );
        if let Err(e) = self
            .observers
            .spawn(execution_id, job.id, move |cancel| observer.run(cancel))
        {
            self.release(&handle).await;
            return Err(e);
        }

        Ok(execution_id)
    }

    /// Best-effort delete of an instance nobody will observe.
    async fn release(&self, handle: &str) {
        if let Err(e) = self.backend.delete_instance(handle).await {
            tracing::warn!(instance = %handle, error = %e, "Failed to release orphaned instance");
        }
    }
}
