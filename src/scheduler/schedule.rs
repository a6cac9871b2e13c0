use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{Job, JobKey, JobSpec};

/// A lease that ran out before its holder completed the job.
#[derive(Debug, Clone)]
pub struct ExpiredLease {
    pub key: JobKey,
    pub worker: String,
    pub fail_count: u32,
    pub spec: JobSpec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub outstanding: usize,
    pub assigned: usize,
}

/// Authoritative store of job state, priority order and leases.
///
/// Unassigned jobs live in `outstanding`, kept stably sorted by `sort_time`.
/// Assigned jobs are only reachable through `jobs`.
#[derive(Debug)]
pub struct JobTable {
    lease_time: chrono::Duration,
    jobs: HashMap<String, Job>,
    outstanding: Vec<String>,
    /// Last epoch issued or observed per job id. Survives job removal.
    epochs: HashMap<String, u64>,
}

impl JobTable {
    pub fn new(lease_time: Duration) -> Self {
        Self {
            lease_time: chrono::Duration::from_std(lease_time)
                .unwrap_or_else(|_| chrono::Duration::weeks(52)),
            jobs: HashMap::new(),
            outstanding: Vec::new(),
            epochs: HashMap::new(),
        }
    }

    /// Create a job for `id`, or refresh the spec of an unassigned one.
    ///
    /// Assigned jobs are left untouched: their holder owns the spec until the
    /// job completes or its lease expires.
    pub fn add_or_update(&mut self, id: &str, spec: JobSpec) -> JobKey {
        if let Some(job) = self.jobs.get_mut(id) {
            if job.is_assigned() {
                return job.key.clone();
            }
            let resort = job.sort_time != spec.commit_rec_ts;
            job.sort_time = spec.commit_rec_ts;
            job.spec = spec;
            let key = job.key.clone();
            if resort {
                self.sort_outstanding();
            }
            return key;
        }

        let epoch = self.epochs.get(id).map_or(0, |e| e + 1);
        self.epochs.insert(id.to_string(), epoch);
        let key = JobKey::new(id, epoch);
        self.jobs
            .insert(id.to_string(), Job::new(key.clone(), spec, Utc::now()));
        self.outstanding.push(id.to_string());
        self.sort_outstanding();
        tracing::debug!(job_id = %key.id, epoch, "Job created");
        key
    }

    pub fn assign(&mut self, worker: &str) -> Result<Option<Job>> {
        self.assign_at(worker, Utc::now())
    }

    /// Hand the oldest unassigned job to `worker`. `None` when nothing is queued.
    pub fn assign_at(&mut self, worker: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        if worker.is_empty() {
            return Err(SchedulerError::InvalidWorker);
        }

        let deadline = self.lease_deadline(now);
        while !self.outstanding.is_empty() {
            let id = self.outstanding.remove(0);
            if let Some(job) = self.jobs.get_mut(&id) {
                job.assignee = Some(worker.to_string());
                job.lease_expiry = deadline;
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    pub fn renew_lease(
        &mut self,
        key: &JobKey,
        worker: &str,
        progress: Option<&JobSpec>,
    ) -> Result<()> {
        self.renew_lease_at(key, worker, progress, Utc::now())
    }

    /// Extend the lease held by `worker`, copying reported progress if any.
    pub fn renew_lease_at(
        &mut self,
        key: &JobKey,
        worker: &str,
        progress: Option<&JobSpec>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if worker.is_empty() {
            return Err(SchedulerError::InvalidWorker);
        }

        let deadline = self.lease_deadline(now);
        let job = self.held_job_mut(key, worker)?;
        job.lease_expiry = deadline;
        if let Some(progress) = progress {
            job.spec.last_seen_offset = progress.last_seen_offset;
            job.spec.last_block_end_ts = progress.last_block_end_ts;
        }
        Ok(())
    }

    /// Remove a finished job. The epoch is retained so a later job with the
    /// same id starts a new generation.
    ///
    /// Completing a generation that is already gone succeeds without effect;
    /// workers retry completion until they get an answer.
    pub fn complete(&mut self, key: &JobKey, worker: &str) -> Result<()> {
        if worker.is_empty() {
            return Err(SchedulerError::InvalidWorker);
        }

        if !self.jobs.contains_key(&key.id) && self.is_past_generation(key) {
            return Ok(());
        }
        self.held_job_mut(key, worker)?;
        self.jobs.remove(&key.id);
        Ok(())
    }

    pub fn clear_expired_leases(&mut self) -> Vec<ExpiredLease> {
        self.clear_expired_leases_at(Utc::now())
    }

    /// Return every job whose lease ran out before `now` to the queue.
    pub fn clear_expired_leases_at(&mut self, now: DateTime<Utc>) -> Vec<ExpiredLease> {
        let mut expired = Vec::new();
        for job in self.jobs.values_mut() {
            if !job.is_assigned() || job.lease_expiry >= now {
                continue;
            }
            let worker = job.assignee.take().unwrap_or_default();
            job.fail_count += 1;
            expired.push(ExpiredLease {
                key: job.key.clone(),
                worker,
                fail_count: job.fail_count,
                spec: job.spec.clone(),
            });
        }

        if expired.is_empty() {
            return expired;
        }
        // HashMap order is arbitrary; re-queue deterministically.
        expired.sort_by(|a, b| a.key.id.cmp(&b.key.id));
        self.outstanding
            .extend(expired.iter().map(|lease| lease.key.id.clone()));
        self.sort_outstanding();
        expired
    }

    pub fn observe(&mut self, key: &JobKey, worker: &str, spec: JobSpec) -> Result<()> {
        self.observe_at(key, worker, spec, Utc::now())
    }

    /// Record a job a worker reports holding, typically from before a restart.
    ///
    /// The worker's epoch is adopted. Reports for a generation older than the
    /// one the table knows are rejected.
    pub fn observe_at(
        &mut self,
        key: &JobKey,
        worker: &str,
        spec: JobSpec,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if worker.is_empty() {
            return Err(SchedulerError::InvalidWorker);
        }

        let mut fail_count = 0;
        match self.jobs.get(&key.id) {
            Some(existing) if existing.key.epoch > key.epoch => {
                return Err(SchedulerError::JobNotFound(key.to_string()));
            }
            Some(existing) if existing.key.epoch == key.epoch => {
                if existing.is_assigned() && !existing.is_assigned_to(worker) {
                    return Err(SchedulerError::JobNotAssigned {
                        id: key.id.clone(),
                        worker: worker.to_string(),
                    });
                }
                fail_count = existing.fail_count;
            }
            Some(_) => {}
            None if self.is_past_generation(key) => {
                return Err(SchedulerError::JobNotFound(key.to_string()));
            }
            None => {}
        }

        self.outstanding.retain(|id| id != &key.id);
        let epoch = self.epochs.entry(key.id.clone()).or_insert(key.epoch);
        *epoch = (*epoch).max(key.epoch);

        let mut job = Job::new(key.clone(), spec, now);
        job.assignee = Some(worker.to_string());
        job.lease_expiry = self.lease_deadline(now);
        job.fail_count = fail_count;
        self.jobs.insert(key.id.clone(), job);
        Ok(())
    }

    /// Finish a job reported complete while observing.
    ///
    /// A completion for a newer generation than the held record replaces
    /// that record, so the newer epoch is never issued again.
    pub fn complete_observed(&mut self, key: &JobKey, worker: &str) -> Result<()> {
        if worker.is_empty() {
            return Err(SchedulerError::InvalidWorker);
        }

        match self.jobs.get(&key.id) {
            Some(existing) if existing.key.epoch < key.epoch => {
                self.jobs.remove(&key.id);
                self.outstanding.retain(|id| id != &key.id);
            }
            Some(_) => return self.complete(key, worker),
            None => {}
        }
        self.record_completed(key);
        Ok(())
    }

    /// Remember a completion for a job this table never held.
    pub fn record_completed(&mut self, key: &JobKey) {
        let epoch = self.epochs.entry(key.id.clone()).or_insert(key.epoch);
        *epoch = (*epoch).max(key.epoch);
    }

    /// Drop unassigned jobs of a partition whose id is not `current`, the id
    /// of the partition's uncommitted range (`None` when fully committed).
    ///
    /// Epochs are kept. Assigned jobs stay with their holder.
    pub fn supersede(&mut self, topic: &str, partition: i32, current: Option<&str>) -> Vec<JobKey> {
        let stale: Vec<String> = self
            .outstanding
            .iter()
            .filter(|id| Some(id.as_str()) != current)
            .filter(|id| {
                self.jobs.get(id.as_str()).is_some_and(|job| {
                    job.spec.topic == topic && job.spec.partition == partition
                })
            })
            .cloned()
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for id in &stale {
            if let Some(job) = self.jobs.remove(id) {
                removed.push(job.key);
            }
        }
        self.outstanding.retain(|id| !stale.contains(id));
        removed
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// All jobs ordered by priority, then id.
    pub fn jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by(|a, b| a.sort_time.cmp(&b.sort_time).then(a.key.id.cmp(&b.key.id)));
        jobs
    }

    /// Unassigned jobs in the order they will be handed out.
    pub fn outstanding(&self) -> Vec<&Job> {
        self.outstanding
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .collect()
    }

    pub fn last_epoch(&self, id: &str) -> Option<u64> {
        self.epochs.get(id).copied()
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            outstanding: self.outstanding.len(),
            assigned: self.jobs.len() - self.outstanding.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn held_job_mut(&mut self, key: &JobKey, worker: &str) -> Result<&mut Job> {
        let job = self
            .jobs
            .get_mut(&key.id)
            .filter(|job| job.key.epoch == key.epoch)
            .ok_or_else(|| SchedulerError::JobNotFound(key.to_string()))?;
        if !job.is_assigned_to(worker) {
            return Err(SchedulerError::JobNotAssigned {
                id: key.id.clone(),
                worker: worker.to_string(),
            });
        }
        Ok(job)
    }

    fn is_past_generation(&self, key: &JobKey) -> bool {
        self.epochs.get(&key.id).is_some_and(|&e| key.epoch <= e)
    }

    fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lease_time)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    // Stable, so equal sort times keep insertion order.
    fn sort_outstanding(&mut self) {
        let jobs = &self.jobs;
        self.outstanding
            .sort_by_key(|id| jobs.get(id).map(|job| job.sort_time));
    }
}
