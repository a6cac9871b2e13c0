use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::metrics::PartitionGauges;
use crate::partition::PartitionSource;
use crate::scheduler::generator::JobGenerator;
use crate::scheduler::job::{Job, JobKey, JobSpec};
use crate::scheduler::observation::ObservationMode;
use crate::scheduler::schedule::{ExpiredLease, JobTable, TableStats};

/// Called when a job's lease has expired `max_lease_failures` times.
pub trait EscalationHook: Send + Sync {
    fn lease_failures_exceeded(&self, lease: &ExpiredLease);
}

/// Default hook: report the job and keep scheduling it.
#[derive(Debug, Default)]
pub struct LogEscalation;

impl EscalationHook for LogEscalation {
    fn lease_failures_exceeded(&self, lease: &ExpiredLease) {
        tracing::error!(
            job_id = %lease.key.id,
            epoch = lease.key.epoch,
            fail_count = lease.fail_count,
            partition = lease.spec.partition,
            start_offset = lease.spec.start_offset,
            end_offset = lease.spec.end_offset,
            "Job keeps losing its lease"
        );
    }
}

/// Outcome of one job-generation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub partitions: usize,
    pub jobs_planned: usize,
    pub superseded: usize,
    pub expired: usize,
    pub observing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub topic: String,
    pub consumer_group: String,
    pub observation: String,
    pub outstanding_jobs: usize,
    pub assigned_jobs: usize,
}

struct SchedulerState {
    table: JobTable,
    observation: ObservationMode,
}

/// The block-builder scheduler as seen by workers and the sweep loop.
///
/// Table and observation mode sit behind one mutex; every operation runs
/// under it and no log I/O happens while it is held.
pub struct BlockScheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    generator: JobGenerator,
    escalation: Arc<dyn EscalationHook>,
}

impl BlockScheduler {
    /// Create a scheduler whose observation window starts now.
    pub fn new(config: SchedulerConfig, source: Arc<dyn PartitionSource>) -> Self {
        let generator = JobGenerator::new(source, &config.topic, &config.consumer_group);
        let state = SchedulerState {
            table: JobTable::new(config.lease_time),
            observation: ObservationMode::start(config.observation_window),
        };
        if state.observation.is_observing() {
            tracing::info!(
                window_secs = config.observation_window.as_secs(),
                "Observing worker heartbeats before scheduling"
            );
        }

        Self {
            config,
            state: Mutex::new(state),
            generator,
            escalation: Arc::new(LogEscalation),
        }
    }

    pub fn with_escalation_hook(mut self, hook: Arc<dyn EscalationHook>) -> Self {
        self.escalation = hook;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn gauges(&self) -> Arc<RwLock<PartitionGauges>> {
        self.generator.gauges()
    }

    pub async fn is_observing(&self) -> bool {
        self.lock().await.observation.is_observing()
    }

    /// Time left in the observation window, `None` once it has closed.
    pub async fn observation_remaining(&self) -> Option<Duration> {
        self.lock().await.observation.remaining(Instant::now())
    }

    pub async fn end_observation(&self) {
        if self.state.lock().await.observation.finish() {
            tracing::info!("Observation complete, scheduling enabled");
        }
    }

    /// Create or extend a job directly, bypassing the generator.
    pub async fn add_or_update(&self, spec: JobSpec) -> JobKey {
        let id = spec.job_id();
        self.lock().await.table.add_or_update(&id, spec)
    }

    /// Hand the highest-priority job to `worker`.
    pub async fn assign_job(&self, worker: &str) -> Result<(JobKey, JobSpec)> {
        if worker.is_empty() {
            return Err(SchedulerError::InvalidWorker);
        }

        let (assigned, expired) = {
            let mut state = self.lock().await;
            if state.observation.is_observing() {
                return Err(SchedulerError::NoJobAvailable);
            }
            let expired = state.table.clear_expired_leases();
            (state.table.assign(worker)?, expired)
        };
        self.report_expired(&expired);

        let job = assigned.ok_or(SchedulerError::NoJobAvailable)?;
        tracing::info!(
            job_id = %job.key.id,
            epoch = job.key.epoch,
            worker,
            fail_count = job.fail_count,
            "Job assigned"
        );
        Ok((job.key, job.spec))
    }

    /// Heartbeat (`complete == false`) or finish a job held by `worker`.
    ///
    /// During observation, heartbeats for jobs the scheduler has not seen
    /// rebuild them as assigned to the reporting worker.
    pub async fn update_job(
        &self,
        key: &JobKey,
        worker: &str,
        complete: bool,
        spec: &JobSpec,
    ) -> Result<()> {
        let mut state = self.lock().await;
        let observing = state.observation.is_observing();
        let table = &mut state.table;
        let known = table.get(&key.id).is_some_and(|job| job.key.epoch == key.epoch);

        if complete {
            if observing {
                table.complete_observed(key, worker)?;
            } else {
                table.complete(key, worker)?;
            }
            tracing::info!(job_id = %key.id, epoch = key.epoch, worker, "Job completed");
            return Ok(());
        }

        if observing && !known {
            table.observe(key, worker, spec.clone())?;
            tracing::info!(job_id = %key.id, epoch = key.epoch, worker, "Job observed");
            return Ok(());
        }

        table.renew_lease(key, worker, Some(spec))?;
        tracing::debug!(
            job_id = %key.id,
            epoch = key.epoch,
            worker,
            last_seen_offset = spec.last_seen_offset,
            "Lease renewed"
        );
        Ok(())
    }

    /// Run one job-generation sweep.
    ///
    /// Log lookups happen before the table is locked. If any fails the table
    /// is left untouched and the error is returned.
    pub async fn update_schedule(&self) -> Result<SweepSummary> {
        let plans = match self.generator.plan().await {
            Ok(plans) => plans,
            Err(e) => {
                tracing::warn!(error = %e, topic = %self.generator.topic(), "Skipping schedule update");
                return Err(e);
            }
        };

        let mut summary = SweepSummary {
            partitions: plans.len(),
            ..Default::default()
        };
        let expired = {
            let mut state = self.lock().await;
            let expired = state.table.clear_expired_leases();
            summary.expired = expired.len();
            summary.observing = state.observation.is_observing();

            if !summary.observing {
                for plan in plans {
                    let current = plan.spec.as_ref().map(JobSpec::job_id);
                    let superseded =
                        state
                            .table
                            .supersede(self.generator.topic(), plan.partition, current.as_deref());
                    for key in &superseded {
                        tracing::debug!(job_id = %key.id, epoch = key.epoch, "Job superseded");
                    }
                    summary.superseded += superseded.len();

                    if let (Some(id), Some(spec)) = (current, plan.spec) {
                        state.table.add_or_update(&id, spec);
                        summary.jobs_planned += 1;
                    }
                }
            }
            expired
        };
        self.report_expired(&expired);

        tracing::debug!(
            partitions = summary.partitions,
            jobs_planned = summary.jobs_planned,
            superseded = summary.superseded,
            expired = summary.expired,
            observing = summary.observing,
            "Schedule updated"
        );
        Ok(summary)
    }

    /// Snapshot of every tracked job in priority order.
    pub async fn jobs(&self) -> Vec<Job> {
        self.lock().await.table.jobs().into_iter().cloned().collect()
    }

    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.lock().await.table.get(id).cloned()
    }

    pub async fn stats(&self) -> TableStats {
        self.lock().await.table.stats()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.lock().await;
        let stats = state.table.stats();
        SchedulerStatus {
            topic: self.config.topic.clone(),
            consumer_group: self.config.consumer_group.clone(),
            observation: state.observation.to_string(),
            outstanding_jobs: stats.outstanding,
            assigned_jobs: stats.assigned,
        }
    }

    /// Lock the state, closing the observation window if it has run out.
    async fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        let mut state = self.state.lock().await;
        if state.observation.poll(Instant::now()) {
            tracing::info!("Observation window elapsed, scheduling enabled");
        }
        state
    }

    fn report_expired(&self, expired: &[ExpiredLease]) {
        for lease in expired {
            tracing::warn!(
                job_id = %lease.key.id,
                epoch = lease.key.epoch,
                worker = %lease.worker,
                fail_count = lease.fail_count,
                "Lease expired, job requeued"
            );
            if self.config.max_lease_failures == Some(lease.fail_count) {
                self.escalation.lease_failures_exceeded(lease);
            }
        }
    }
}
