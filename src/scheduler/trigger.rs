//! Cron and one-shot timer engine.
//!
//! Each registration runs as its own task that sleeps until the next firing
//! and then awaits the registered callback inline. A callback that blocks
//! (for instance on a full work queue) delays that trigger's next firing;
//! missed cron occurrences are skipped, not replayed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{BoquitaError, Result};
use crate::scheduler::job::Trigger;

pub type TriggerCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wall-clock source used to compute firing times.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wrap an async closure as a [`TriggerCallback`].
pub fn callback<F, Fut>(f: F) -> TriggerCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as Pin<Box<dyn Future<Output = ()> + Send>>)
}

/// A parsed trigger expression.
#[derive(Debug, Clone)]
pub enum Firing {
    Recurring { expression: String, cron: Cron },
    Once { at: DateTime<Utc> },
}

impl Firing {
    /// Parse a standard 5-field cron expression (UTC).
    pub fn cron(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let cron = Cron::new(expression).parse().map_err(|e| {
            BoquitaError::Validation(format!("invalid cron expression {:?}: {}", expression, e))
        })?;
        Ok(Firing::Recurring {
            expression: expression.to_string(),
            cron,
        })
    }

    /// Parse a one-shot schedule: an RFC 3339 instant, or a cron expression
    /// whose next occurrence after `now` is used once.
    pub fn schedule(expression: &str, now: DateTime<Utc>) -> Result<Self> {
        let expression = expression.trim();
        if let Ok(at) = DateTime::parse_from_rfc3339(expression) {
            let at = at.with_timezone(&Utc);
            if at <= now {
                return Err(BoquitaError::Validation(format!(
                    "schedule {} is in the past",
                    expression
                )));
            }
            return Ok(Firing::Once { at });
        }

        let cron = Cron::new(expression).parse().map_err(|e| {
            BoquitaError::Validation(format!(
                "invalid schedule {:?}: not an RFC 3339 time nor a cron expression ({})",
                expression, e
            ))
        })?;
        let at = cron.find_next_occurrence(&now, false).map_err(|e| {
            BoquitaError::Validation(format!("schedule {:?} never fires: {}", expression, e))
        })?;
        Ok(Firing::Once { at })
    }

    /// Parse the expression carried by a manifest trigger; `None` for immediate jobs.
    pub fn from_trigger(trigger: &Trigger) -> Result<Option<Self>> {
        match trigger {
            Trigger::None => Ok(None),
            Trigger::Cron(expr) => Self::cron(expr).map(Some),
            Trigger::Schedule(expr) => Self::schedule(expr, Utc::now()).map(Some),
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Firing::Recurring { .. })
    }

    /// The first firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Firing::Recurring { expression, cron } => {
                cron.find_next_occurrence(&after, false).map_err(|e| {
                    BoquitaError::Validation(format!(
                        "cron expression {:?} has no next occurrence: {}",
                        expression, e
                    ))
                })
            }
            Firing::Once { at } => Ok(*at),
        }
    }
}

#[derive(Debug)]
struct Registration {
    firing: Firing,
    cancel: CancellationToken,
}

/// Snapshot of an active registration.
#[derive(Debug, Clone)]
pub struct RegisteredTrigger {
    pub handle: Uuid,
    pub recurring: bool,
}

/// Owns all trigger timers. Dropping out of the parent token stops them.
pub struct TriggerScheduler {
    registrations: Arc<Mutex<HashMap<Uuid, Registration>>>,
    cancel: CancellationToken,
    clock: Clock,
}

impl std::fmt::Debug for TriggerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerScheduler")
            .field("registrations", &self.len())
            .finish_non_exhaustive()
    }
}

impl TriggerScheduler {
    /// Timers stop when `parent` is cancelled.
    pub fn new(parent: &CancellationToken) -> Self {
        Self::with_clock(parent, Arc::new(Utc::now))
    }

    /// Like [`TriggerScheduler::new`], reading the current time from `clock`.
    pub fn with_clock(parent: &CancellationToken, clock: Clock) -> Self {
        Self {
            registrations: Arc::new(Mutex::new(HashMap::new())),
            cancel: parent.child_token(),
            clock,
        }
    }

    /// Start firing `callback` according to `firing`; returns the registration handle.
    pub fn register(&self, firing: Firing, callback: TriggerCallback) -> Uuid {
        let handle = Uuid::new_v4();
        let cancel = self.cancel.child_token();
        let registrations = self.registrations.clone();
        let clock = self.clock.clone();

        let mut guard = lock(&self.registrations);
        guard.insert(
            handle,
            Registration {
                firing: firing.clone(),
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(async move {
            run_registration(handle, firing, callback, clock, cancel).await;
            lock(&registrations).remove(&handle);
        });
        drop(guard);

        tracing::debug!(handle = %handle, "Trigger registered");
        handle
    }

    /// Stop a registration. Returns false if the handle is unknown or already finished.
    pub fn deregister(&self, handle: &Uuid) -> bool {
        match lock(&self.registrations).remove(handle) {
            Some(registration) => {
                registration.cancel.cancel();
                tracing::debug!(handle = %handle, "Trigger deregistered");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: &Uuid) -> bool {
        lock(&self.registrations).contains_key(handle)
    }

    pub fn registrations(&self) -> Vec<RegisteredTrigger> {
        lock(&self.registrations)
            .iter()
            .map(|(handle, registration)| RegisteredTrigger {
                handle: *handle,
                recurring: registration.firing.is_recurring(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.registrations).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every timer; later registrations are stopped immediately.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        lock(&self.registrations).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_registration(
    handle: Uuid,
    firing: Firing,
    callback: TriggerCallback,
    clock: Clock,
    cancel: CancellationToken,
) {
    let mut after = clock();
    loop {
        let next = match firing.next_after(after) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(handle = %handle, error = %e, "Trigger has no further firings");
                break;
            }
        };
        let wait = (next - clock()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        tracing::debug!(handle = %handle, scheduled_for = %next, "Trigger fired");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = callback() => {}
        }

        if !firing.is_recurring() {
            break;
        }
        after = next.max(clock());
    }
}
