//! Deadline that keeps the talking indicator up between inbound chunks.

use std::time::{Duration, Instant};

pub const DEFAULT_TALKING_FALLBACK: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct FallbackTimer {
    window: Duration,
    deadline: Option<Instant>,
}

impl FallbackTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// (Re)start the window from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Disarm and return true when the deadline has passed.
    pub fn expire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for FallbackTimer {
    fn default() -> Self {
        Self::new(DEFAULT_TALKING_FALLBACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_only_after_window() {
        let start = Instant::now();
        let mut timer = FallbackTimer::new(Duration::from_millis(2_000));
        assert!(!timer.expire_if_due(start));
        timer.arm(start);
        assert!(timer.is_armed());
        assert!(!timer.expire_if_due(start + Duration::from_millis(1_999)));
        assert!(timer.expire_if_due(start + Duration::from_millis(2_000)));
        assert!(!timer.is_armed());
        assert!(!timer.expire_if_due(start + Duration::from_secs(5)));
    }

    #[test]
    fn rearming_extends_the_deadline() {
        let start = Instant::now();
        let mut timer = FallbackTimer::default();
        timer.arm(start);
        timer.arm(start + Duration::from_millis(1_500));
        assert!(!timer.expire_if_due(start + Duration::from_millis(2_100)));
        assert_eq!(
            timer.remaining(start + Duration::from_millis(2_500)),
            Some(Duration::from_millis(1_000))
        );
    }

    #[test]
    fn disarm_clears_deadline() {
        let start = Instant::now();
        let mut timer = FallbackTimer::default();
        timer.arm(start);
        timer.disarm();
        assert!(!timer.is_armed());
        assert_eq!(timer.remaining(start), None);
    }
}
