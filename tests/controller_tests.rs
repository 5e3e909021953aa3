use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use boquita::error::BoquitaError;
use boquita::backend::InstanceStatus;
use boquita::scheduler::job::{Execution, ExecutionStatus, Job};
use boquita::scheduler::{Controller, JobManifest, JobStores, Trigger, TriggerScheduler, WorkQueue};

struct Fixture {
    controller: Controller,
    queue: Arc<WorkQueue<Job>>,
    scheduler: Arc<TriggerScheduler>,
    stores: JobStores,
    cancel: CancellationToken,
}

fn fixture(queue_capacity: usize) -> Fixture {
    let cancel = CancellationToken::new();
    let stores = JobStores::new();
    let queue = Arc::new(WorkQueue::new(queue_capacity).unwrap());
    let scheduler = Arc::new(TriggerScheduler::new(&cancel));
    let controller = Controller::new(
        stores.clone(),
        queue.clone(),
        scheduler.clone(),
        100,
        cancel.clone(),
    );
    Fixture {
        controller,
        queue,
        scheduler,
        stores,
        cancel,
    }
}

#[tokio::test]
async fn test_immediate_job_is_pushed_once_without_registration() {
    let f = fixture(10);
    let job_id = f
        .controller
        .create_job(JobManifest::new("nginx:latest"))
        .await
        .unwrap();

    assert_eq!(f.queue.len(), 1);
    assert!(f.scheduler.is_empty());
    assert!(f.stores.triggers.is_empty().await);

    let queued = f.queue.try_pull().await.unwrap();
    assert_eq!(queued.id, job_id);
    assert_eq!(queued.name, "nginx");
    assert!(f.queue.is_empty());
}

#[tokio::test]
async fn test_cron_job_registers_one_trigger_and_record() {
    let f = fixture(10);
    let manifest =
        JobManifest::new("alpine:3").with_trigger(Trigger::Cron("*/5 * * * *".to_string()));
    let job_id = f.controller.create_job(manifest).await.unwrap();

    assert!(f.queue.is_empty());
    let registrations = f.scheduler.registrations();
    assert_eq!(registrations.len(), 1);
    assert!(registrations[0].recurring);

    assert_eq!(f.stores.triggers.len().await, 1);
    let record = f.stores.triggers.get(&job_id).await.unwrap();
    assert_eq!(record.job_id, job_id);
    assert_eq!(record.handle, registrations[0].handle);

    f.cancel.cancel();
}

#[tokio::test]
async fn test_invalid_cron_fails_before_any_store_write() {
    let f = fixture(10);
    let manifest = JobManifest::new("alpine:3").with_trigger(Trigger::Cron("every day".into()));

    let err = f.controller.create_job(manifest).await.unwrap_err();
    assert!(matches!(err, BoquitaError::Validation(_)));
    assert!(f.stores.jobs.is_empty().await);
    assert!(f.stores.triggers.is_empty().await);
    assert!(f.scheduler.is_empty());
    assert!(f.queue.is_empty());
}

#[tokio::test]
async fn test_invalid_manifest_is_rejected() {
    let f = fixture(10);
    let err = f
        .controller
        .create_job(JobManifest::new("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, BoquitaError::Validation(_)));
    assert!(f.stores.jobs.is_empty().await);
}

#[tokio::test]
async fn test_schedule_registers_one_shot_trigger() {
    let f = fixture(10);
    let at = (Utc::now() + ChronoDuration::hours(1)).to_rfc3339();
    let manifest = JobManifest::new("alpine:3").with_trigger(Trigger::Schedule(at));
    let job_id = f.controller.create_job(manifest).await.unwrap();

    let registrations = f.scheduler.registrations();
    assert_eq!(registrations.len(), 1);
    assert!(!registrations[0].recurring);
    assert!(f.stores.triggers.get(&job_id).await.is_ok());
    assert!(f.queue.is_empty());

    f.cancel.cancel();
}

#[tokio::test]
async fn test_scheduled_job_is_queued_when_it_fires() {
    let f = fixture(10);
    let at = (Utc::now() + ChronoDuration::milliseconds(100)).to_rfc3339();
    let manifest = JobManifest::new("alpine:3").with_trigger(Trigger::Schedule(at));
    let job_id = f.controller.create_job(manifest).await.unwrap();

    let queued = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        f.queue.pull(&f.cancel),
    )
    .await
    .expect("scheduled job should be queued")
    .unwrap();
    assert_eq!(queued.id, job_id);
}

#[tokio::test]
async fn test_past_schedule_is_rejected() {
    let f = fixture(10);
    let manifest = JobManifest::new("alpine:3")
        .with_trigger(Trigger::Schedule("2001-01-01T00:00:00Z".into()));
    assert!(matches!(
        f.controller.create_job(manifest).await,
        Err(BoquitaError::Validation(_))
    ));
    assert!(f.stores.jobs.is_empty().await);
}

#[tokio::test]
async fn test_get_by_id_returns_only_own_executions_newest_first() {
    let f = fixture(10);
    let job_a = f
        .controller
        .create_job(JobManifest::new("nginx:latest"))
        .await
        .unwrap();
    let job_b = f
        .controller
        .create_job(JobManifest::new("redis:7"))
        .await
        .unwrap();

    let mut older = Execution::running(Uuid::new_v4(), job_a, "i-1".into(), "nginx-1".into());
    older.started_at = Utc::now() - ChronoDuration::minutes(10);
    older.apply(&InstanceStatus::stopped(0, Utc::now()));
    let newer = Execution::running(Uuid::new_v4(), job_a, "i-2".into(), "nginx-2".into());
    let other = Execution::running(Uuid::new_v4(), job_b, "i-3".into(), "redis-1".into());
    for execution in [older.clone(), newer.clone(), other] {
        f.stores
            .executions
            .set(execution.id, execution)
            .await
            .unwrap();
    }

    let detail = f.controller.get_by_id(&job_a).await.unwrap();
    assert_eq!(detail.job.id, job_a);
    let ids: Vec<Uuid> = detail.executions.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
    let last = detail.last_execution.unwrap();
    assert_eq!(last.id, newer.id);
    assert_eq!(last.status, ExecutionStatus::Running);
    assert_eq!(detail.executions[1].status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn test_get_by_id_unknown_job_is_not_found() {
    let f = fixture(10);
    let err = f.controller.get_by_id(&Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_jobs_attaches_last_execution() {
    let f = fixture(10);
    let with_run = f
        .controller
        .create_job(JobManifest::new("nginx:latest"))
        .await
        .unwrap();
    let without_run = f
        .controller
        .create_job(JobManifest::new("redis:7"))
        .await
        .unwrap();

    let execution = Execution::running(Uuid::new_v4(), with_run, "i-1".into(), "nginx-1".into());
    f.stores
        .executions
        .set(execution.id, execution.clone())
        .await
        .unwrap();

    let jobs = f.controller.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2);
    for summary in jobs {
        if summary.job.id == with_run {
            assert_eq!(summary.last_execution.unwrap().id, execution.id);
        } else {
            assert_eq!(summary.job.id, without_run);
            assert!(summary.last_execution.is_none());
        }
    }
}

#[tokio::test]
async fn test_list_jobs_is_capped_at_page_size() {
    let cancel = CancellationToken::new();
    let stores = JobStores::new();
    let queue = Arc::new(WorkQueue::new(10).unwrap());
    let scheduler = Arc::new(TriggerScheduler::new(&cancel));
    let controller = Controller::new(stores, queue, scheduler, 3, cancel.clone());

    for _ in 0..5 {
        controller
            .create_job(JobManifest::new("alpine:3").with_trigger(Trigger::Cron("@daily".into())))
            .await
            .unwrap();
    }
    assert_eq!(controller.list_jobs().await.unwrap().len(), 3);
    cancel.cancel();
}

#[tokio::test]
async fn test_remove_trigger_deregisters_and_drops_record() {
    let f = fixture(10);
    let manifest = JobManifest::new("alpine:3").with_trigger(Trigger::Cron("0 * * * *".into()));
    let job_id = f.controller.create_job(manifest).await.unwrap();
    assert_eq!(f.scheduler.len(), 1);

    f.controller.remove_trigger(&job_id).await.unwrap();
    assert!(f.scheduler.is_empty());
    assert!(f.stores.triggers.is_empty().await);
    // The job itself stays
    assert!(f.controller.get_by_id(&job_id).await.is_ok());

    let again = f.controller.remove_trigger(&job_id).await.unwrap_err();
    assert!(again.is_not_found());
}

#[tokio::test]
async fn test_remove_trigger_of_immediate_job_is_not_found() {
    let f = fixture(10);
    let job_id = f
        .controller
        .create_job(JobManifest::new("nginx:latest"))
        .await
        .unwrap();
    assert!(f
        .controller
        .remove_trigger(&job_id)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_immediate_create_waits_on_full_queue() {
    let f = fixture(1);
    f.controller
        .create_job(JobManifest::new("nginx:latest"))
        .await
        .unwrap();
    assert!(f.queue.is_full());

    let controller = Arc::new(f.controller);
    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.create_job(JobManifest::new("redis:7")).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    let first = f.queue.try_pull().await.unwrap();
    assert_eq!(first.name, "nginx");
    let second_id = tokio::time::timeout(std::time::Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(f.queue.try_pull().await.unwrap().id, second_id);
}
