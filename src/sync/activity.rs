use std::time::Duration;
use tokio::time::Instant;

/// At most one activity update is recorded per window, however bursty the
/// input stream is.
pub const ACTIVITY_THROTTLE: Duration = Duration::from_millis(1000);

/// Generic user-input signal. The concrete binding (pointer, keyboard, touch)
/// lives with whoever owns the input devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityEvent {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    Touch,
    Click,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Dropped by the coalescing window.
    Throttled,
    Recorded,
    /// First activity after the user went inactive; the scheduler should
    /// reset its interval.
    Resumed,
}

#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    last_activity: Instant,
    last_recorded: Option<Instant>,
    inactivity_delay: Duration,
    throttle: Duration,
}

impl ActivityMonitor {
    pub fn new(now: Instant, inactivity_delay: Duration) -> Self {
        Self {
            last_activity: now,
            last_recorded: None,
            inactivity_delay,
            throttle: ACTIVITY_THROTTLE,
        }
    }

    pub fn record_activity(&mut self, now: Instant) -> Activity {
        if let Some(prev) = self.last_recorded {
            if now.saturating_duration_since(prev) < self.throttle {
                return Activity::Throttled;
            }
        }
        let was_inactive = !self.is_active(now);
        self.last_activity = now;
        self.last_recorded = Some(now);
        if was_inactive {
            Activity::Resumed
        } else {
            Activity::Recorded
        }
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.idle_for(now) < self.inactivity_delay
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(30);

    #[test]
    fn starts_active() {
        let t0 = Instant::now();
        let monitor = ActivityMonitor::new(t0, DELAY);
        assert!(monitor.is_active(t0 + Duration::from_secs(29)));
        assert!(!monitor.is_active(t0 + DELAY));
    }

    #[test]
    fn bursts_are_coalesced_to_one_update_per_second() {
        let t0 = Instant::now();
        let mut monitor = ActivityMonitor::new(t0, DELAY);
        assert_eq!(monitor.record_activity(t0), Activity::Recorded);
        for ms in [1, 100, 500, 999] {
            let at = t0 + Duration::from_millis(ms);
            assert_eq!(monitor.record_activity(at), Activity::Throttled);
        }
        assert_eq!(monitor.last_activity(), t0);

        let later = t0 + Duration::from_millis(1000);
        assert_eq!(monitor.record_activity(later), Activity::Recorded);
        assert_eq!(monitor.last_activity(), later);
    }

    #[test]
    fn activity_after_idle_period_reports_resume() {
        let t0 = Instant::now();
        let mut monitor = ActivityMonitor::new(t0, DELAY);
        let back = t0 + Duration::from_secs(45);
        assert_eq!(monitor.record_activity(back), Activity::Resumed);
        assert!(monitor.is_active(back));
        assert_eq!(monitor.idle_for(back + Duration::from_secs(2)), Duration::from_secs(2));
    }
}
