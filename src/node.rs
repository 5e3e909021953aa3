use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::backend::{build_backend, ComputeBackend};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::scheduler::{Controller, JobStores, TriggerScheduler, WorkQueue};
use crate::worker::{Executor, ObserverRegistry};

/// A single orchestrator process: stores, queue, triggers, executor and API.
pub struct Node {
    config: NodeConfig,
    controller: Arc<Controller>,
    scheduler: Arc<TriggerScheduler>,
    observers: Arc<ObserverRegistry>,
    executor: Executor,
    cancel: CancellationToken,
}

impl Node {
    /// Build a node with the backend selected in `config`.
    pub fn new(config: NodeConfig, cancel: CancellationToken) -> Result<Self> {
        let backend = build_backend(&config.backend)?;
        Self::with_backend(config, backend, cancel)
    }

    pub fn with_backend(
        config: NodeConfig,
        backend: Arc<dyn ComputeBackend>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let stores = JobStores::new();
        let queue = Arc::new(WorkQueue::new(config.queue_capacity)?);
        let scheduler = Arc::new(TriggerScheduler::new(&cancel));
        let observers = Arc::new(ObserverRegistry::new(&cancel, config.max_observers));

        let executor = Executor::new(
            queue.clone(),
            stores.executions.clone(),
            backend,
            observers.clone(),
            config.dispatch_interval,
            config.observer.clone(),
        );
        let controller = Arc::new(Controller::new(
            stores,
            queue,
            scheduler.clone(),
            config.list_page_size,
            cancel.clone(),
        ));

        Ok(Self {
            config,
            controller,
            scheduler,
            observers,
            executor,
            cancel,
        })
    }

    pub fn controller(&self) -> Arc<Controller> {
        self.controller.clone()
    }

    pub fn observers(&self) -> Arc<ObserverRegistry> {
        self.observers.clone()
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            controller: self.controller.clone(),
            observers: self.observers.clone(),
        }
    }

    /// Bind the configured address and run until cancelled.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Run the executor and the API on `listener` until the cancellation token fires.
    ///
    /// On shutdown the scheduler stops firing and observers exit without
    /// deleting their instances.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let Node {
            config,
            controller,
            scheduler,
            observers,
            executor,
            cancel,
        } = self;
        tracing::info!(
            backend = config.backend.name(),
            queue_capacity = config.queue_capacity,
            "Boquita node starting"
        );

        let executor_cancel = cancel.clone();
        let executor_task = tokio::spawn(async move { executor.run(executor_cancel).await });

        let state = ApiState {
            controller,
            observers: observers.clone(),
        };
        let served = api::serve(listener, state, cancel.clone()).await;

        // The API can also stop on a bind or accept error
        cancel.cancel();
        scheduler.shutdown();
        if let Err(e) = executor_task.await {
            tracing::error!(error = %e, "Executor task failed");
        }
        observers.cancel_all();
        observers.join_all().await;

        tracing::info!("Boquita node stopped");
        served
    }
}
