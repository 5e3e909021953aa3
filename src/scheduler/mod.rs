//! Job intake: data model, work queue, triggers and the controller.
//!
//! Jobs enter through [`Controller::create_job`]. Immediate jobs are pushed
//! onto the [`WorkQueue`] directly; cron and scheduled jobs are handed to the
//! [`TriggerScheduler`], whose callbacks push them when they fire.

pub mod controller;
pub mod job;
pub mod queue;
pub mod trigger;

pub use controller::{Controller, JobStores};
pub use job::{
    Execution, ExecutionStatus, Job, JobDetail, JobManifest, JobSummary, Trigger,
    TriggerRegistration,
};
pub use queue::WorkQueue;
pub use trigger::{Clock, Firing, TriggerScheduler};
