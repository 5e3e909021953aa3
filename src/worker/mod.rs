//! Execution side of the orchestrator.
//!
//! - [`Executor`]: pulls jobs off the work queue, creates an instance per job
//!   and records a RUNNING execution
//! - [`Observer`]: polls one instance until it stops, then deletes it
//! - [`ObserverRegistry`]: owns the observer tasks so they can be listed,
//!   capped and cancelled
//!
//! # Execution Flow
//!
//! 1. Executor tick pulls one job from the queue
//! 2. Backend creates `<job name>-<execution id>` with autostart
//! 3. Execution is stored as RUNNING and an observer is spawned
//! 4. Observer persists every status report; on a terminal status it deletes
//!    the instance (retried up to 3 times) and exits

pub mod executor;
pub mod observer;
pub mod registry;

pub use executor::Executor;
pub use observer::{Observer, ObserverExit, RetryPolicy};
pub use registry::{ObserverInfo, ObserverRegistry};
