use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// Scheduling behaviour of the block-builder scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Log topic whose partitions are turned into jobs.
    pub topic: String,
    /// Consumer group whose committed offsets mark finished work.
    pub consumer_group: String,
    /// How long an assignment stays exclusive without a heartbeat.
    pub lease_time: Duration,
    /// Interval between job-generation sweeps.
    pub scheduling_interval: Duration,
    /// How long after startup worker heartbeats are only observed.
    pub observation_window: Duration,
    /// Number of lease expiries after which a job is escalated.
    /// `None` disables escalation.
    pub max_lease_failures: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            topic: "ingest".to_string(),
            consumer_group: "block-builder".to_string(),
            lease_time: Duration::from_secs(300),
            scheduling_interval: Duration::from_secs(60),
            observation_window: Duration::from_secs(30),
            max_lease_failures: Some(5),
        }
    }
}

impl SchedulerConfig {
    pub fn new(topic: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            ..Default::default()
        }
    }

    pub fn with_lease_time(mut self, lease_time: Duration) -> Self {
        self.lease_time = lease_time;
        self
    }

    pub fn with_scheduling_interval(mut self, interval: Duration) -> Self {
        self.scheduling_interval = interval;
        self
    }

    pub fn with_observation_window(mut self, window: Duration) -> Self {
        self.observation_window = window;
        self
    }

    pub fn with_max_lease_failures(mut self, max: Option<u32>) -> Self {
        self.max_lease_failures = max;
        self
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(SchedulerError::InvalidConfig("topic must be set".into()));
        }
        if self.consumer_group.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "consumer group must be set".into(),
            ));
        }
        if self.lease_time.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "lease time must be positive".into(),
            ));
        }
        if self.scheduling_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "scheduling interval must be positive".into(),
            ));
        }
        if self.max_lease_failures == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "max lease failures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    pub scheduler: SchedulerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8080"
                .parse()
                .expect("default listen address is valid"),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(listen_addr: SocketAddr, scheduler: SchedulerConfig) -> Self {
        Self {
            listen_addr,
            scheduler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_default() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.topic, "ingest");
        assert_eq!(cfg.consumer_group, "block-builder");
        assert_eq!(cfg.lease_time, Duration::from_secs(300));
        assert_eq!(cfg.scheduling_interval, Duration::from_secs(60));
        assert_eq!(cfg.observation_window, Duration::from_secs(30));
        assert_eq!(cfg.max_lease_failures, Some(5));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn scheduler_config_builders() {
        let cfg = SchedulerConfig::new("events", "builders")
            .with_lease_time(Duration::from_secs(10))
            .with_scheduling_interval(Duration::from_secs(2))
            .with_observation_window(Duration::ZERO)
            .with_max_lease_failures(None);
        assert_eq!(cfg.topic, "events");
        assert_eq!(cfg.consumer_group, "builders");
        assert_eq!(cfg.lease_time, Duration::from_secs(10));
        assert_eq!(cfg.scheduling_interval, Duration::from_secs(2));
        assert!(cfg.observation_window.is_zero());
        assert!(cfg.max_lease_failures.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_topic_and_group() {
        let cfg = SchedulerConfig::new("", "builders");
        assert!(matches!(
            cfg.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));

        let cfg = SchedulerConfig::new("ingest", "");
        assert!(matches!(
            cfg.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let cfg = SchedulerConfig::default().with_lease_time(Duration::ZERO);
        assert!(cfg.validate().is_err());

        let cfg = SchedulerConfig::default().with_scheduling_interval(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_failure_threshold() {
        let cfg = SchedulerConfig::default().with_max_lease_failures(Some(0));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.scheduler.topic, "ingest");
    }

    #[test]
    fn node_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = NodeConfig::new(addr, SchedulerConfig::new("t", "g"));
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.scheduler.topic, "t");
        assert_eq!(cfg.scheduler.consumer_group, "g");
    }
}
