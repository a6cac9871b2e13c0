use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::metrics::PartitionGauges;
use crate::partition::{CommittedOffset, PartitionOffsets, PartitionSource};
use crate::scheduler::job::JobSpec;

/// The job one partition should have, as computed by a sweep.
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    pub partition: i32,
    pub offsets: PartitionOffsets,
    /// `None` when everything in the partition is committed.
    pub spec: Option<JobSpec>,
}

/// Turns partition offsets and committed offsets into job specs.
pub struct JobGenerator {
    source: Arc<dyn PartitionSource>,
    topic: String,
    consumer_group: String,
    gauges: Arc<RwLock<PartitionGauges>>,
}

impl JobGenerator {
    pub fn new(
        source: Arc<dyn PartitionSource>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            source,
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            gauges: Arc::new(RwLock::new(PartitionGauges::default())),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn gauges(&self) -> Arc<RwLock<PartitionGauges>> {
        self.gauges.clone()
    }

    /// Query the log and compute the wanted job for every partition.
    ///
    /// Gauges are published as soon as partition offsets are known. Any failed
    /// lookup fails the whole plan so that nothing partial is applied.
    pub async fn plan(&self) -> Result<Vec<PartitionPlan>> {
        let partitions = self.source.describe_partitions(&self.topic).await?;

        {
            let mut gauges = self.gauges.write().await;
            for (partition, offsets) in &partitions {
                gauges.set(*partition, offsets.start_offset, offsets.end_offset);
            }
        }

        let mut plans = Vec::with_capacity(partitions.len());
        for (partition, offsets) in partitions {
            let committed = self
                .source
                .last_committed(&self.consumer_group, &self.topic, partition)
                .await?;
            let spec = uncommitted_range(&self.topic, partition, offsets, committed);
            tracing::debug!(
                partition,
                start_offset = offsets.start_offset,
                end_offset = offsets.end_offset,
                committed = ?committed.map(|c| c.offset),
                planned = spec.is_some(),
                "Partition observed"
            );
            plans.push(PartitionPlan {
                partition,
                offsets,
                spec,
            });
        }
        Ok(plans)
    }
}

/// Spec covering `[committed, end)` of a partition, if anything is uncommitted.
///
/// A partition nobody has committed on starts at its first retained offset
/// and sorts as oldest possible. A commit behind retention is clamped to the
/// partition start.
pub fn uncommitted_range(
    topic: &str,
    partition: i32,
    offsets: PartitionOffsets,
    committed: Option<CommittedOffset>,
) -> Option<JobSpec> {
    let (start_offset, commit_rec_ts) = match committed {
        Some(c) => (c.offset.max(offsets.start_offset), c.timestamp),
        None => (offsets.start_offset, DateTime::<Utc>::UNIX_EPOCH),
    };

    if offsets.end_offset <= start_offset {
        return None;
    }
    Some(JobSpec::new(
        topic,
        partition,
        start_offset,
        offsets.end_offset,
        commit_rec_ts,
    ))
}
