//! Startup observation window.
//!
//! The job table is not persisted, so a freshly started scheduler knows
//! nothing about jobs workers were already building. While the window is open
//! the scheduler only listens: worker heartbeats rebuild the table, no job is
//! handed out and no job is generated. The window closes once its deadline
//! passes, whether or not every worker has reported.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationMode {
    Observing { deadline: Instant },
    Complete,
}

impl ObservationMode {
    /// Open a window of `window` starting now. A zero window starts complete.
    pub fn start(window: Duration) -> Self {
        if window.is_zero() {
            ObservationMode::Complete
        } else {
            ObservationMode::Observing {
                deadline: Instant::now() + window,
            }
        }
    }

    pub fn is_observing(&self) -> bool {
        matches!(self, ObservationMode::Observing { .. })
    }

    /// Close the window if its deadline has passed.
    /// Returns true only on the transition.
    pub fn poll(&mut self, now: Instant) -> bool {
        match *self {
            ObservationMode::Observing { deadline } if now >= deadline => {
                *self = ObservationMode::Complete;
                true
            }
            _ => false,
        }
    }

    /// Close the window immediately. Returns true only on the transition.
    pub fn finish(&mut self) -> bool {
        let was_observing = self.is_observing();
        *self = ObservationMode::Complete;
        was_observing
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match *self {
            ObservationMode::Observing { deadline } => Some(deadline.saturating_duration_since(now)),
            ObservationMode::Complete => None,
        }
    }
}

impl std::fmt::Display for ObservationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservationMode::Observing { .. } => write!(f, "observing"),
            ObservationMode::Complete => write!(f, "complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_window_starts_complete() {
        let mode = ObservationMode::start(Duration::ZERO);
        assert_eq!(mode, ObservationMode::Complete);
        assert!(!mode.is_observing());
        assert!(mode.remaining(Instant::now()).is_none());
    }

    #[test]
    fn poll_closes_after_deadline_only() {
        let mut mode = ObservationMode::start(Duration::from_secs(60));
        assert!(mode.is_observing());

        assert!(!mode.poll(Instant::now()));
        assert!(mode.is_observing());

        assert!(mode.poll(Instant::now() + Duration::from_secs(61)));
        assert_eq!(mode, ObservationMode::Complete);

        // One-way: polling again does nothing.
        assert!(!mode.poll(Instant::now() + Duration::from_secs(120)));
        assert_eq!(mode.to_string(), "complete");
    }

    #[test]
    fn finish_is_one_way() {
        let mut mode = ObservationMode::start(Duration::from_secs(60));
        assert_eq!(mode.to_string(), "observing");
        assert!(mode.finish());
        assert!(!mode.finish());
        assert!(!mode.is_observing());
    }

    #[test]
    fn remaining_counts_down() {
        let now = Instant::now();
        let mode = ObservationMode::Observing {
            deadline: now + Duration::from_secs(10),
        };
        assert_eq!(mode.remaining(now), Some(Duration::from_secs(10)));
        assert_eq!(
            mode.remaining(now + Duration::from_secs(20)),
            Some(Duration::ZERO)
        );
    }
}
