//! Shared helpers for integration tests: a scripted in-memory compute backend
//! and polling assertions.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use boquita::backend::{
    BackendError, ComputeBackend, CreateInstanceRequest, CreatedInstance, InstanceStatus,
};
use boquita::config::{NodeConfig, ObserverConfig};

/// Compute backend whose answers are queued up by the test.
///
/// `get_instance` pops scripted replies and falls back to "still running"
/// once they run out. Every call is counted.
#[derive(Default)]
pub struct ScriptedBackend {
    statuses: Mutex<VecDeque<Result<InstanceStatus, BackendError>>>,
    creates: Mutex<VecDeque<Result<CreatedInstance, BackendError>>>,
    deletes: Mutex<VecDeque<Result<(), BackendError>>>,
    requests: Mutex<Vec<CreateInstanceRequest>>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_status(&self, status: Result<InstanceStatus, BackendError>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn push_running(&self, times: usize) {
        for _ in 0..times {
            self.push_status(Ok(InstanceStatus::running()));
        }
    }

    pub fn push_stopped(&self, exit_code: i32) {
        self.push_status(Ok(InstanceStatus::stopped(exit_code, Utc::now())));
    }

    pub fn push_get_failures(&self, times: usize) {
        for _ in 0..times {
            self.push_status(Err(BackendError::Transport("connection reset".into())));
        }
    }

    pub fn push_create(&self, result: Result<CreatedInstance, BackendError>) {
        self.creates.lock().unwrap().push_back(result);
    }

    pub fn push_delete(&self, result: Result<(), BackendError>) {
        self.deletes.lock().unwrap().push_back(result);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CreateInstanceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeBackend for ScriptedBackend {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<CreatedInstance, BackendError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.creates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CreatedInstance::created(format!("instance-{}", n))))
    }

    async fn get_instance(&self, _handle: &str) -> Result<InstanceStatus, BackendError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(InstanceStatus::running()))
    }

    async fn delete_instance(&self, _handle: &str) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.deletes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Observer timings short enough for tests.
pub fn fast_observer_config() -> ObserverConfig {
    ObserverConfig {
        poll_interval: Duration::from_millis(20),
        max_retries: 3,
        retry_backoff: Duration::from_millis(5),
    }
}

pub fn test_node_config() -> NodeConfig {
    NodeConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        ..NodeConfig::default()
    }
    .with_observer(fast_observer_config())
}

/// Poll a condition until it holds or the timeout expires
pub async fn wait_for<F, Fut>(condition: F, timeout_duration: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}
