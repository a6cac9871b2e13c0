//! Read access to the partitioned log the scheduler builds jobs from.
//!
//! The scheduler never consumes records itself. It only needs the offset
//! bounds of every partition and the offset the block builders' consumer
//! group has committed, which [`PartitionSource`] provides.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod memory;

pub use memory::InMemoryLog;

/// Offset bounds of one partition. `end_offset` is the next offset to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOffsets {
    pub start_offset: i64,
    pub end_offset: i64,
}

/// Position committed by a consumer group: the next offset to consume and the
/// timestamp of the last record consumed before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOffset {
    pub offset: i64,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait PartitionSource: Send + Sync {
    async fn describe_partitions(&self, topic: &str) -> Result<BTreeMap<i32, PartitionOffsets>>;

    /// `None` when the group has never committed on this partition.
    async fn last_committed(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<CommittedOffset>>;
}
