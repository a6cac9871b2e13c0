use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Result, SchedulerError};
use crate::partition::{CommittedOffset, PartitionOffsets, PartitionSource};

#[derive(Debug, Default)]
struct PartitionLog {
    start_offset: i64,
    /// Record timestamps by offset, for records still retained.
    records: BTreeMap<i64, DateTime<Utc>>,
    end_offset: i64,
}

#[derive(Debug, Default)]
struct LogState {
    topics: HashMap<String, Vec<PartitionLog>>,
    commits: HashMap<(String, String, i32), CommittedOffset>,
}

/// In-process log with consumer-group commits.
///
/// Backs the development server and the tests. Only record timestamps are
/// kept, since that is all the scheduler looks at.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    state: RwLock<LogState>,
    unavailable: AtomicBool,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with `partitions` empty partitions. Existing topics are kept.
    pub async fn create_topic(&self, topic: &str, partitions: i32) {
        let mut state = self.state.write().await;
        state.topics.entry(topic.to_string()).or_insert_with(|| {
            (0..partitions.max(0))
                .map(|_| PartitionLog::default())
                .collect()
        });
    }

    /// Append a record and return its offset.
    pub async fn produce(
        &self,
        topic: &str,
        partition: i32,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let mut state = self.state.write().await;
        let log = partition_mut(&mut state, topic, partition)?;
        let offset = log.end_offset;
        log.records.insert(offset, timestamp);
        log.end_offset += 1;
        Ok(offset)
    }

    /// Commit `offset` for `group`, meaning every record before it is consumed.
    pub async fn commit(&self, group: &str, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let log = partition_mut(&mut state, topic, partition)?;
        if offset <= log.start_offset || offset > log.end_offset {
            return Err(SchedulerError::PartitionSource(format!(
                "offset {} out of range for {}/{}",
                offset, topic, partition
            )));
        }
        let timestamp = log
            .records
            .get(&(offset - 1))
            .copied()
            .ok_or_else(|| {
                SchedulerError::PartitionSource(format!(
                    "record {} missing in {}/{}",
                    offset - 1,
                    topic,
                    partition
                ))
            })?;

        state.commits.insert(
            (group.to_string(), topic.to_string(), partition),
            CommittedOffset { offset, timestamp },
        );
        Ok(())
    }

    /// Drop records before `start_offset`, as retention would.
    pub async fn truncate(&self, topic: &str, partition: i32, start_offset: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let log = partition_mut(&mut state, topic, partition)?;
        let start_offset = start_offset.min(log.end_offset);
        if start_offset > log.start_offset {
            log.records = log.records.split_off(&start_offset);
            log.start_offset = start_offset;
        }
        Ok(())
    }

    /// Make every metadata call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchedulerError::PartitionSource("log unavailable".into()));
        }
        Ok(())
    }
}

fn partition_mut<'a>(
    state: &'a mut LogState,
    topic: &str,
    partition: i32,
) -> Result<&'a mut PartitionLog> {
    state
        .topics
        .get_mut(topic)
        .and_then(|partitions| usize::try_from(partition).ok().and_then(|p| partitions.get_mut(p)))
        .ok_or_else(|| {
            SchedulerError::PartitionSource(format!("unknown partition {}/{}", topic, partition))
        })
}

#[async_trait]
impl PartitionSource for InMemoryLog {
    async fn describe_partitions(&self, topic: &str) -> Result<BTreeMap<i32, PartitionOffsets>> {
        self.check_available()?;
        let state = self.state.read().await;
        let partitions = state.topics.get(topic).ok_or_else(|| {
            SchedulerError::PartitionSource(format!("unknown topic {}", topic))
        })?;

        Ok(partitions
            .iter()
            .enumerate()
            .map(|(i, log)| {
                (
                    i as i32,
                    PartitionOffsets {
                        start_offset: log.start_offset,
                        end_offset: log.end_offset,
                    },
                )
            })
            .collect())
    }

    async fn last_committed(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<CommittedOffset>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .commits
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn produce_advances_end_offset() {
        let log = InMemoryLog::new();
        log.create_topic("ingest", 2).await;

        assert_eq!(log.produce("ingest", 1, Utc::now()).await.unwrap(), 0);
        assert_eq!(log.produce("ingest", 1, Utc::now()).await.unwrap(), 1);

        let parts = log.describe_partitions("ingest").await.unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[&0], PartitionOffsets { start_offset: 0, end_offset: 0 });
        assert_eq!(parts[&1], PartitionOffsets { start_offset: 0, end_offset: 2 });
    }

    #[tokio::test]
    async fn commit_records_last_consumed_timestamp() {
        let log = InMemoryLog::new();
        log.create_topic("ingest", 1).await;
        let t0 = Utc::now() - Duration::hours(2);
        let t1 = Utc::now() - Duration::hours(1);
        log.produce("ingest", 0, t0).await.unwrap();
        log.produce("ingest", 0, t1).await.unwrap();

        assert!(log.last_committed("g", "ingest", 0).await.unwrap().is_none());

        log.commit("g", "ingest", 0, 1).await.unwrap();
        let committed = log.last_committed("g", "ingest", 0).await.unwrap().unwrap();
        assert_eq!(committed.offset, 1);
        assert_eq!(committed.timestamp, t0);

        // Other groups are independent.
        assert!(log.last_committed("other", "ingest", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_rejects_out_of_range_offsets() {
        let log = InMemoryLog::new();
        log.create_topic("ingest", 1).await;
        log.produce("ingest", 0, Utc::now()).await.unwrap();

        assert!(log.commit("g", "ingest", 0, 0).await.is_err());
        assert!(log.commit("g", "ingest", 0, 2).await.is_err());
        assert!(log.commit("g", "ingest", 3, 1).await.is_err());
    }

    #[tokio::test]
    async fn truncate_moves_start_offset() {
        let log = InMemoryLog::new();
        log.create_topic("ingest", 1).await;
        for _ in 0..5 {
            log.produce("ingest", 0, Utc::now()).await.unwrap();
        }
        log.truncate("ingest", 0, 3).await.unwrap();

        let parts = log.describe_partitions("ingest").await.unwrap();
        assert_eq!(parts[&0], PartitionOffsets { start_offset: 3, end_offset: 5 });
        assert!(log.commit("g", "ingest", 0, 3).await.is_err());
        assert!(log.commit("g", "ingest", 0, 4).await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_log_fails_metadata_calls() {
        let log = InMemoryLog::new();
        log.create_topic("ingest", 1).await;
        log.set_unavailable(true);
        assert!(log.describe_partitions("ingest").await.is_err());
        assert!(log.last_committed("g", "ingest", 0).await.is_err());

        log.set_unavailable(false);
        assert!(log.describe_partitions("ingest").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_topic_is_an_error() {
        let log = InMemoryLog::new();
        assert!(log.describe_partitions("missing").await.is_err());
        assert!(log.produce("missing", 0, Utc::now()).await.is_err());
    }
}
