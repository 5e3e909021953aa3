use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::{
    Execution, Job, JobDetail, JobManifest, JobSummary, TriggerRegistration,
};
use crate::scheduler::queue::WorkQueue;
use crate::scheduler::trigger::{self, Firing, TriggerCallback, TriggerScheduler};
use crate::store::MemoryStore;

/// Field the execution store is indexed on.
pub const EXECUTION_JOB_INDEX: &str = "job_id";

/// The three entity stores shared by the controller and the executor.
#[derive(Debug, Clone)]
pub struct JobStores {
    pub jobs: Arc<MemoryStore<Job>>,
    pub executions: Arc<MemoryStore<Execution>>,
    /// Keyed by job id
    pub triggers: Arc<MemoryStore<TriggerRegistration>>,
}

impl Default for JobStores {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStores {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(MemoryStore::new()),
            executions: Arc::new(MemoryStore::new().with_index(EXECUTION_JOB_INDEX)),
            triggers: Arc::new(MemoryStore::new()),
        }
    }
}

/// Entry point for job submission and read queries.
pub struct Controller {
    stores: JobStores,
    queue: Arc<WorkQueue<Job>>,
    scheduler: Arc<TriggerScheduler>,
    page_size: usize,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        stores: JobStores,
        queue: Arc<WorkQueue<Job>>,
        scheduler: Arc<TriggerScheduler>,
        page_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stores,
            queue,
            scheduler,
            page_size,
            cancel,
        }
    }

    pub fn stores(&self) -> &JobStores {
        &self.stores
    }

    pub fn scheduler(&self) -> &Arc<TriggerScheduler> {
        &self.scheduler
    }

    /// Persist a job and arrange for it to reach the work queue.
    ///
    /// The trigger expression is parsed before anything is stored. Jobs
    /// without a trigger are pushed once, waiting while the queue is full.
    pub async fn create_job(&self, manifest: JobManifest) -> Result<Uuid> {
        manifest.validate()?;
        let firing = Firing::from_trigger(&manifest.trigger)?;
        let trigger = manifest.trigger.clone();

        let job_id = self
            .stores
            .jobs
            .insert_with(|id| Job::new(id, manifest))
            .await?;
        let job = self.stores.jobs.get(&job_id).await?;
        tracing::info!(job_id = %job_id, name = %job.name, trigger = trigger.kind(), "Job created");

        let Some(firing) = firing else {
            self.queue.push_cancellable(job, &self.cancel).await?;
            tracing::debug!(job_id = %job_id, "Job queued");
            return Ok(job_id);
        };

        let recurring = firing.is_recurring();
        let handle = self.scheduler.register(firing, self.enqueue_callback(job));
        let registration = TriggerRegistration {
            job_id,
            handle,
            trigger,
            registered_at: Utc::now(),
        };
        if let Err(e) = self.stores.triggers.set(job_id, registration).await {
            self.scheduler.deregister(&handle);
            return Err(e);
        }

        tracing::info!(job_id = %job_id, handle = %handle, recurring, "Trigger registered");
        Ok(job_id)
    }

    fn enqueue_callback(&self, job: Job) -> TriggerCallback {
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        trigger::callback(move || {
            let queue = queue.clone();
            let cancel = cancel.clone();
            let job = job.clone();
            async move {
                let job_id = job.id;
                match queue.push_cancellable(job, &cancel).await {
                    Ok(()) => tracing::info!(job_id = %job_id, "Trigger fired, job queued"),
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Trigger fired but job was not queued")
                    }
                }
            }
        })
    }

    /// Job with its full execution history, newest first.
    pub async fn get_by_id(&self, id: &Uuid) -> Result<JobDetail> {
        let job = self.stores.jobs.get(id).await?;
        let executions = self.executions_of(id).await?;
        Ok(JobDetail {
            job,
            last_execution: executions.first().cloned(),
            executions,
        })
    }

    /// Up to one page of jobs, each with its most recent execution.
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let jobs = self.stores.jobs.list(self.page_size, 0).await?;
        let mut summaries = Vec::with_capacity(jobs.len());
        for job in jobs {
            let last_execution = self.executions_of(&job.id).await?.into_iter().next();
            summaries.push(JobSummary {
                job,
                last_execution,
            });
        }
        Ok(summaries)
    }

    /// Stop a job's trigger and drop its registration record.
    ///
    /// A one-shot trigger that already fired only loses its record.
    pub async fn remove_trigger(&self, job_id: &Uuid) -> Result<()> {
        let registration = self.stores.triggers.get(job_id).await?;
        let was_active = self.scheduler.deregister(&registration.handle);
        self.stores.triggers.remove(job_id).await?;
        tracing::info!(
            job_id = %job_id,
            handle = %registration.handle,
            was_active,
            "Trigger removed"
        );
        Ok(())
    }

    async fn executions_of(&self, job_id: &Uuid) -> Result<Vec<Execution>> {
        let mut executions = self
            .stores
            .executions
            .search_by(EXECUTION_JOB_INDEX, &json!(job_id))
            .await?;
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }
}
