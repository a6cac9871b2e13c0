//! Job-lease scheduling for block builders.
//!
//! - [`schedule`]: the job table, priority order and leases
//! - [`observation`]: the startup window that rebuilds state from heartbeats
//! - [`generator`]: turns partition offsets into jobs
//! - [`service`]: [`BlockScheduler`], the surface workers and the sweep loop call

pub mod generator;
pub mod job;
pub mod observation;
pub mod schedule;
pub mod service;

pub use job::{job_id, Job, JobKey, JobSpec};
pub use observation::ObservationMode;
pub use schedule::{ExpiredLease, JobTable, TableStats};
pub use service::{BlockScheduler, EscalationHook, LogEscalation, SchedulerStatus, SweepSummary};
