use std::time::{Duration, Instant};

/// Whether a frame should produce a capture event.
///
/// Fires only for a valid change arriving strictly more than `min_interval`
/// after the previous trigger. `None` means nothing has fired yet in this
/// video, so the first valid change always fires.
pub fn should_trigger(
    is_valid_change: bool,
    now: Instant,
    last_trigger: Option<Instant>,
    min_interval: Duration,
) -> bool {
    is_valid_change
        && last_trigger.map_or(true, |last| now.saturating_duration_since(last) > min_interval)
}

/// Per-video debounce state. Build a new one for every video.
#[derive(Debug, Clone)]
pub struct DebouncePolicy {
    min_interval: Duration,
    last_trigger: Option<Instant>,
}

impl DebouncePolicy {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_trigger: None,
        }
    }

    /// Evaluate one frame and record the trigger time when it fires.
    pub fn evaluate(&mut self, is_valid_change: bool, now: Instant) -> bool {
        let fire = should_trigger(is_valid_change, now, self.last_trigger, self.min_interval);
        if fire {
            self.last_trigger = Some(now);
        }
        fire
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_suppresses_close_triggers() {
        let t0 = Instant::now();
        let mut policy = DebouncePolicy::new(Duration::from_secs(1));
        assert!(policy.evaluate(true, t0));
        assert!(!policy.evaluate(true, t0 + Duration::from_millis(500)));
        assert!(policy.evaluate(true, t0 + Duration::from_millis(1200)));
        assert_eq!(policy.last_trigger(), Some(t0 + Duration::from_millis(1200)));
    }

    #[test]
    fn suppressed_frames_do_not_extend_the_window() {
        let t0 = Instant::now();
        let mut policy = DebouncePolicy::new(Duration::from_secs(1));
        assert!(policy.evaluate(true, t0));
        assert!(!policy.evaluate(true, t0 + Duration::from_millis(900)));
        assert!(policy.evaluate(true, t0 + Duration::from_millis(1100)));
    }

    #[test]
    fn invalid_change_never_fires() {
        let t0 = Instant::now();
        let mut policy = DebouncePolicy::new(Duration::ZERO);
        assert!(!policy.evaluate(false, t0));
        assert_eq!(policy.last_trigger(), None);
    }

    #[test]
    fn interval_boundary_is_exclusive() {
        let t0 = Instant::now();
        let interval = Duration::from_secs(1);
        assert!(!should_trigger(true, t0 + interval, Some(t0), interval));
        assert!(should_trigger(true, t0 + interval + Duration::from_millis(1), Some(t0), interval));
        assert!(should_trigger(true, t0, None, interval));
    }
}
