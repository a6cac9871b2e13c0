use std::sync::{Arc, Mutex};
use std::time::Duration;

use blockbuilder_scheduler::config::SchedulerConfig;
use blockbuilder_scheduler::error::SchedulerError;
use blockbuilder_scheduler::partition::InMemoryLog;
use blockbuilder_scheduler::scheduler::{
    BlockScheduler, EscalationHook, ExpiredLease, JobKey, JobSpec,
};
use chrono::Utc;

fn test_config(observation: Duration) -> SchedulerConfig {
    SchedulerConfig::new("ingest", "test-builder")
        .with_lease_time(Duration::from_secs(300))
        .with_scheduling_interval(Duration::from_secs(3600))
        .with_observation_window(observation)
}

fn test_scheduler(config: SchedulerConfig) -> BlockScheduler {
    BlockScheduler::new(config, Arc::new(InMemoryLog::new()))
}

fn spec(partition: i32, start: i64, end: i64, age_hours: i64) -> JobSpec {
    JobSpec::new(
        "ingest",
        partition,
        start,
        end,
        Utc::now() - chrono::Duration::hours(age_hours),
    )
}

#[derive(Default)]
struct RecordingHook {
    escalated: Mutex<Vec<(JobKey, u32)>>,
}

impl EscalationHook for RecordingHook {
    fn lease_failures_exceeded(&self, lease: &ExpiredLease) {
        self.escalated
            .lock()
            .unwrap()
            .push((lease.key.clone(), lease.fail_count));
    }
}

#[tokio::test]
async fn test_client_interface() {
    let sched = test_scheduler(test_config(Duration::ZERO));
    assert!(!sched.is_observing().await);

    sched.add_or_update(spec(64, 1000, 2000, 2)).await;
    sched.add_or_update(spec(65, 256, 9111, 1)).await;

    let (a1key, a1spec) = sched.assign_job("w0").await.unwrap();
    assert_eq!(a1key.id, "ingest/64/1000");
    assert_eq!(a1spec.end_offset, 2000);

    for _ in 0..5 {
        sched.update_job(&a1key, "w0", false, &a1spec).await.unwrap();
    }
    for _ in 0..5 {
        sched.update_job(&a1key, "w0", true, &a1spec).await.unwrap();
    }

    let (a2key, a2spec) = sched.assign_job("w0").await.unwrap();
    assert_eq!(a2key.id, "ingest/65/256");

    for _ in 0..5 {
        sched.update_job(&a2key, "w0", false, &a2spec).await.unwrap();
    }
    for _ in 0..5 {
        sched.update_job(&a2key, "w0", true, &a2spec).await.unwrap();
    }

    // Clients repeat completions of finished jobs.
    for _ in 0..5 {
        sched.update_job(&a1key, "w0", true, &a1spec).await.unwrap();
    }

    assert!(matches!(
        sched.assign_job("w0").await,
        Err(SchedulerError::NoJobAvailable)
    ));
}

#[tokio::test]
async fn test_startup_observation() {
    let sched = test_scheduler(test_config(Duration::from_secs(3600)));
    assert!(sched.is_observing().await);

    // Jobs that exist on workers but the restarted scheduler does not know.
    let j1 = (JobKey::new("ingest/64/1000", 10), spec(64, 1000, 2000, 1));
    let j2 = (JobKey::new("ingest/65/256", 11), spec(65, 256, 9111, 2));
    let j3 = (JobKey::new("ingest/66/57", 12), spec(66, 57, 100, 3));

    sched.update_job(&j1.0, "w0", false, &j1.1).await.unwrap();
    sched.update_job(&j2.0, "w0", true, &j2.1).await.unwrap();
    for _ in 0..3 {
        sched.update_job(&j3.0, "w0", false, &j3.1).await.unwrap();
    }
    sched.update_job(&j3.0, "w0", true, &j3.1).await.unwrap();

    // Nothing is handed out while observing, even with known jobs.
    sched.add_or_update(spec(67, 0, 10, 5)).await;
    assert!(matches!(
        sched.assign_job("w1").await,
        Err(SchedulerError::NoJobAvailable)
    ));

    sched.end_observation().await;
    assert!(!sched.is_observing().await);

    // The observed world carries over.
    let observed = sched.get_job("ingest/64/1000").await.unwrap();
    assert_eq!(observed.key.epoch, 10);
    assert_eq!(observed.assignee.as_deref(), Some("w0"));

    sched.update_job(&j1.0, "w0", false, &j1.1).await.unwrap();
    sched.update_job(&j1.0, "w0", false, &j1.1).await.unwrap();
    sched.update_job(&j2.0, "w0", true, &j2.1).await.unwrap();
    sched.update_job(&j3.0, "w0", true, &j3.1).await.unwrap();

    // Another worker cannot take over an observed lease.
    assert!(matches!(
        sched.update_job(&j1.0, "w1", false, &j1.1).await,
        Err(SchedulerError::JobNotAssigned { .. })
    ));

    sched.update_job(&j1.0, "w0", true, &j1.1).await.unwrap();
    sched.update_job(&j2.0, "w0", true, &j2.1).await.unwrap();
    sched.update_job(&j3.0, "w0", true, &j3.1).await.unwrap();

    // Only the job queued during observation remains.
    let (key, _) = sched.assign_job("w1").await.unwrap();
    assert_eq!(key.id, "ingest/67/0");
}

#[tokio::test]
async fn test_heartbeat_for_unknown_job_after_observation() {
    let sched = test_scheduler(test_config(Duration::ZERO));
    let key = JobKey::new("ingest/1/0", 3);
    let s = spec(1, 0, 10, 1);

    assert!(matches!(
        sched.update_job(&key, "w0", false, &s).await,
        Err(SchedulerError::JobNotFound(_))
    ));
    assert!(matches!(
        sched.update_job(&key, "w0", true, &s).await,
        Err(SchedulerError::JobNotFound(_))
    ));
    assert!(sched.jobs().await.is_empty());
}

#[tokio::test]
async fn test_observation_window_closes_on_its_own() {
    let sched = test_scheduler(test_config(Duration::from_millis(50)));
    sched.add_or_update(spec(0, 0, 10, 1)).await;

    assert!(matches!(
        sched.assign_job("w0").await,
        Err(SchedulerError::NoJobAvailable)
    ));
    assert!(sched.observation_remaining().await.is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(!sched.is_observing().await);
    assert!(sched.observation_remaining().await.is_none());
    let (key, _) = sched.assign_job("w0").await.unwrap();
    assert_eq!(key.id, "ingest/0/0");
}

#[tokio::test]
async fn test_empty_worker_is_rejected() {
    let sched = test_scheduler(test_config(Duration::ZERO));
    sched.add_or_update(spec(0, 0, 10, 1)).await;

    assert!(matches!(
        sched.assign_job("").await,
        Err(SchedulerError::InvalidWorker)
    ));
    let (key, s) = sched.assign_job("w0").await.unwrap();
    assert!(matches!(
        sched.update_job(&key, "", false, &s).await,
        Err(SchedulerError::InvalidWorker)
    ));
}

#[tokio::test]
async fn test_heartbeat_reports_progress() {
    let sched = test_scheduler(test_config(Duration::ZERO));
    sched.add_or_update(spec(3, 100, 200, 1)).await;
    let (key, mut s) = sched.assign_job("w0").await.unwrap();

    s.last_seen_offset = 150;
    s.last_block_end_ts = Some(Utc::now());
    sched.update_job(&key, "w0", false, &s).await.unwrap();

    let job = sched.get_job(&key.id).await.unwrap();
    assert_eq!(job.spec.last_seen_offset, 150);
    assert_eq!(job.spec.last_block_end_ts, s.last_block_end_ts);
}

#[tokio::test]
async fn test_expired_lease_is_reassigned_and_escalated() {
    let hook = Arc::new(RecordingHook::default());
    let config = test_config(Duration::ZERO)
        .with_lease_time(Duration::from_millis(20))
        .with_max_lease_failures(Some(2));
    let sched = test_scheduler(config).with_escalation_hook(hook.clone());
    sched.add_or_update(spec(0, 0, 10, 1)).await;

    let (key, s) = sched.assign_job("w0").await.unwrap();
    assert!(matches!(
        sched.assign_job("w1").await,
        Err(SchedulerError::NoJobAvailable)
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;

    // The expired job goes to the next caller.
    let (again, _) = sched.assign_job("w1").await.unwrap();
    assert_eq!(again, key);
    assert_eq!(sched.get_job(&key.id).await.unwrap().fail_count, 1);
    assert!(hook.escalated.lock().unwrap().is_empty());

    // The previous holder learns it lost the lease.
    assert!(matches!(
        sched.update_job(&key, "w0", false, &s).await,
        Err(SchedulerError::JobNotAssigned { .. })
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (third, _) = sched.assign_job("w2").await.unwrap();
    assert_eq!(third, key);

    let escalated = hook.escalated.lock().unwrap().clone();
    assert_eq!(escalated, vec![(key.clone(), 2)]);

    // Escalation fires once, at the threshold.
    tokio::time::sleep(Duration::from_millis(50)).await;
    sched.assign_job("w3").await.unwrap();
    assert_eq!(hook.escalated.lock().unwrap().len(), 1);
    assert_eq!(sched.get_job(&key.id).await.unwrap().fail_count, 3);
}

#[tokio::test]
async fn test_status_reports_counts() {
    let sched = test_scheduler(test_config(Duration::ZERO));
    sched.add_or_update(spec(0, 0, 10, 2)).await;
    sched.add_or_update(spec(1, 0, 10, 1)).await;
    sched.assign_job("w0").await.unwrap();

    let status = sched.status().await;
    assert_eq!(status.topic, "ingest");
    assert_eq!(status.consumer_group, "test-builder");
    assert_eq!(status.observation, "complete");
    assert_eq!(status.outstanding_jobs, 1);
    assert_eq!(status.assigned_jobs, 1);

    let jobs = sched.jobs().await;
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].key.id, "ingest/0/0");
}

#[tokio::test]
async fn test_observed_completion_of_newer_epoch_advances_generation() {
    let sched = test_scheduler(test_config(Duration::from_secs(3600)));
    let j = spec(64, 1000, 2000, 1);
    let old = JobKey::new("ingest/64/1000", 10);
    let newer = JobKey::new("ingest/64/1000", 11);

    // A stale worker still heartbeats the old generation while another
    // worker reports the newer one finished.
    sched.update_job(&old, "wA", false, &j).await.unwrap();
    sched.update_job(&newer, "wB", true, &j).await.unwrap();
    assert!(sched.get_job(&old.id).await.is_none());

    // Retries from either worker are harmless.
    sched.update_job(&newer, "wB", true, &j).await.unwrap();
    sched.update_job(&old, "wA", true, &j).await.unwrap();
    assert!(matches!(
        sched.update_job(&old, "wA", false, &j).await,
        Err(SchedulerError::JobNotFound(_))
    ));

    sched.end_observation().await;
    let recreated = sched.add_or_update(j.clone()).await;
    assert_eq!(recreated.id, "ingest/64/1000");
    assert!(recreated.epoch >= 12);
}

#[tokio::test]
async fn test_observed_completion_of_older_epoch_is_rejected() {
    let sched = test_scheduler(test_config(Duration::from_secs(3600)));
    let j = spec(64, 1000, 2000, 1);
    let current = JobKey::new("ingest/64/1000", 11);

    sched.update_job(&current, "wA", false, &j).await.unwrap();
    assert!(matches!(
        sched
            .update_job(&JobKey::new("ingest/64/1000", 10), "wB", true, &j)
            .await,
        Err(SchedulerError::JobNotFound(_))
    ));

    let held = sched.get_job(&current.id).await.unwrap();
    assert_eq!(held.key.epoch, 11);
    assert_eq!(held.assignee.as_deref(), Some("wA"));
}
