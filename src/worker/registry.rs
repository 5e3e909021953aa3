use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{BoquitaError, Result};
use crate::worker::observer::ObserverExit;

struct ObserverEntry {
    job_id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// An in-flight observer as reported by [`ObserverRegistry::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverInfo {
    pub execution_id: Uuid,
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Supervised set of observer tasks keyed by execution id.
///
/// At most one observer runs per execution. Every observer gets a child of
/// the registry's token, so cancelling the parent stops all of them; single
/// observers can be cancelled by id. Finished observers remove themselves.
pub struct ObserverRegistry {
    observers: Arc<Mutex<HashMap<Uuid, ObserverEntry>>>,
    cancel: CancellationToken,
    max_observers: Option<usize>,
}

impl ObserverRegistry {
    pub fn new(parent: &CancellationToken, max_observers: Option<usize>) -> Self {
        Self {
            observers: Arc::new(Mutex::new(HashMap::new())),
            cancel: parent.child_token(),
            max_observers,
        }
    }

    /// Spawn the observer built by `run` for `execution_id`.
    ///
    /// Fails if one is already running for that execution or the cap is reached.
    pub fn spawn<F, Fut>(&self, execution_id: Uuid, job_id: Uuid, run: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<ObserverExit>> + Send + 'static,
    {
        let mut observers = lock(&self.observers);
        if observers.contains_key(&execution_id) {
            return Err(BoquitaError::DuplicateObserver(execution_id));
        }
        if let Some(max) = self.max_observers {
            if observers.len() >= max {
                return Err(BoquitaError::ObserverLimit(max));
            }
        }

        let cancel = self.cancel.child_token();
        let observer = run(cancel.clone());
        let registry = self.observers.clone();
        let handle = tokio::spawn(async move {
            match observer.await {
                Ok(exit) => {
                    tracing::info!(execution_id = %execution_id, exit = ?exit, "Observer finished");
                }
                Err(e) => {
                    tracing::error!(execution_id = %execution_id, error = %e, "Observer failed");
                }
            }
            lock(&registry).remove(&execution_id);
        });

        observers.insert(
            execution_id,
            ObserverEntry {
                job_id,
                started_at: Utc::now(),
                cancel,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    /// Cancel the observer of one execution. Returns false if none is running.
    pub fn cancel(&self, execution_id: &Uuid) -> bool {
        match lock(&self.observers).get(execution_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Wait until every currently registered observer task has exited.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut observers = lock(&self.observers);
            observers
                .values_mut()
                .filter_map(|entry| entry.handle.take())
                .collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Observer task panicked or was aborted");
            }
        }
    }

    pub fn list(&self) -> Vec<ObserverInfo> {
        lock(&self.observers)
            .iter()
            .map(|(execution_id, entry)| ObserverInfo {
                execution_id: *execution_id,
                job_id: entry.job_id,
                started_at: entry.started_at,
            })
            .collect()
    }

    pub fn contains(&self, execution_id: &Uuid) -> bool {
        lock(&self.observers).contains_key(execution_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.observers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.max_observers
            .is_some_and(|max| lock(&self.observers).len() >= max)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
