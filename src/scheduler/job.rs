use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one generation of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct JobKey {
    pub id: String,
    pub epoch: u64,
}

impl JobKey {
    pub fn new(id: impl Into<String>, epoch: u64) -> Self {
        Self {
            id: id.into(),
            epoch,
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.epoch)
    }
}

/// Derive the stable job id for the range of `partition` starting at `start_offset`.
pub fn job_id(topic: &str, partition: i32, start_offset: i64) -> String {
    format!("{}/{}/{}", topic, partition, start_offset)
}

/// The range of log records a job covers, plus progress reported by its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub topic: String,
    pub partition: i32,
    pub start_offset: i64,
    pub end_offset: i64,
    /// Timestamp of the last record already committed for the partition.
    pub commit_rec_ts: DateTime<Utc>,
    pub last_seen_offset: i64,
    pub last_block_end_ts: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        start_offset: i64,
        end_offset: i64,
        commit_rec_ts: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            start_offset,
            end_offset,
            commit_rec_ts,
            last_seen_offset: start_offset - 1,
            last_block_end_ts: None,
        }
    }

    pub fn job_id(&self) -> String {
        job_id(&self.topic, self.partition, self.start_offset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    pub sort_time: DateTime<Utc>,
    pub assignee: Option<String>,
    pub lease_expiry: DateTime<Utc>,
    pub fail_count: u32,
    pub spec: JobSpec,
}

impl Job {
    pub(crate) fn new(key: JobKey, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            key,
            sort_time: spec.commit_rec_ts,
            assignee: None,
            lease_expiry: now,
            fail_count: 0,
            spec,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.assignee.is_some()
    }

    pub fn is_assigned_to(&self, worker: &str) -> bool {
        self.assignee.as_deref() == Some(worker)
    }
}
