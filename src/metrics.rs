use std::collections::BTreeMap;
use std::fmt::Write;

use crate::scheduler::schedule::TableStats;

const METRIC_PREFIX: &str = "blockbuilder_scheduler";

/// Last observed offset bounds per partition, refreshed by every sweep.
#[derive(Debug, Default, Clone)]
pub struct PartitionGauges {
    start_offsets: BTreeMap<i32, i64>,
    end_offsets: BTreeMap<i32, i64>,
}

impl PartitionGauges {
    pub fn set(&mut self, partition: i32, start_offset: i64, end_offset: i64) {
        self.start_offsets.insert(partition, start_offset);
        self.end_offsets.insert(partition, end_offset);
    }

    pub fn start_offset(&self, partition: i32) -> Option<i64> {
        self.start_offsets.get(&partition).copied()
    }

    pub fn end_offset(&self, partition: i32) -> Option<i64> {
        self.end_offsets.get(&partition).copied()
    }

    pub fn start_offsets(&self) -> Vec<i64> {
        self.start_offsets.values().copied().collect()
    }

    pub fn end_offsets(&self) -> Vec<i64> {
        self.end_offsets.values().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.start_offsets.is_empty()
    }
}

/// Render gauges and job counts in the Prometheus text format.
pub fn render(gauges: &PartitionGauges, stats: TableStats) -> String {
    let mut out = String::new();
    write_partition_gauge(
        &mut out,
        "partition_start_offset",
        "The observed start offset of each partition.",
        &gauges.start_offsets,
    );
    write_partition_gauge(
        &mut out,
        "partition_end_offset",
        "The observed end offset of each partition.",
        &gauges.end_offsets,
    );
    write_gauge(
        &mut out,
        "outstanding_jobs",
        "Jobs waiting for a worker.",
        stats.outstanding as i64,
    );
    write_gauge(
        &mut out,
        "assigned_jobs",
        "Jobs currently leased to a worker.",
        stats.assigned as i64,
    );
    out
}

// Writing to a String cannot fail.
fn write_partition_gauge(out: &mut String, name: &str, help: &str, values: &BTreeMap<i32, i64>) {
    let _ = writeln!(out, "# HELP {METRIC_PREFIX}_{name} {help}");
    let _ = writeln!(out, "# TYPE {METRIC_PREFIX}_{name} gauge");
    for (partition, value) in values {
        let _ = writeln!(out, "{METRIC_PREFIX}_{name}{{partition=\"{partition}\"}} {value}");
    }
}

fn write_gauge(out: &mut String, name: &str, help: &str, value: i64) {
    let _ = writeln!(out, "# HELP {METRIC_PREFIX}_{name} {help}");
    let _ = writeln!(out, "# TYPE {METRIC_PREFIX}_{name} gauge");
    let _ = writeln!(out, "{METRIC_PREFIX}_{name} {value}");
}
