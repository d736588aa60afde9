use chrono::{DateTime, Utc};

/// Identifies a pending deadline. One slot per key: rescheduling replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKey {
    /// Close of the stack-race collection window.
    StackWindow,
}

/// A small arena of scheduled deadlines. Deliberately passive: callers
/// poll `fire_due` with their own notion of "now", so tests advance
/// virtual time instead of sleeping.
#[derive(Debug, Default)]
pub struct TimerQueue {
    pending: Vec<(TimerKey, DateTime<Utc>)>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: TimerKey, deadline: DateTime<Utc>) {
        self.cancel(key);
        self.pending.push((key, deadline));
    }

    pub fn cancel(&mut self, key: TimerKey) {
        self.pending.retain(|(k, _)| *k != key);
    }

    pub fn is_scheduled(&self, key: TimerKey) -> bool {
        self.pending.iter().any(|(k, _)| *k == key)
    }

    /// The soonest pending deadline, for callers that want to sleep.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.iter().map(|(_, d)| *d).min()
    }

    /// Removes and returns every key whose deadline has passed, in
    /// deadline order.
    pub fn fire_due(&mut self, now: DateTime<Utc>) -> Vec<TimerKey> {
        let mut due: Vec<(TimerKey, DateTime<Utc>)> = Vec::new();
        self.pending.retain(|entry| {
            if entry.1 <= now {
                due.push(*entry);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(_, d)| *d);
        due.into_iter().map(|(k, _)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_fire_due_only_past_deadlines() {
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKey::StackWindow, at(1_000));

        assert!(timers.fire_due(at(999)).is_empty());
        assert_eq!(timers.fire_due(at(1_000)), vec![TimerKey::StackWindow]);
        // Fired timers do not fire again
        assert!(timers.fire_due(at(2_000)).is_empty());
    }

    #[test]
    fn test_reschedule_replaces_existing() {
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKey::StackWindow, at(1_000));
        timers.schedule(TimerKey::StackWindow, at(5_000));

        assert!(timers.fire_due(at(1_000)).is_empty());
        assert_eq!(timers.next_deadline(), Some(at(5_000)));
    }

    #[test]
    fn test_cancel() {
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKey::StackWindow, at(1_000));
        timers.cancel(TimerKey::StackWindow);
        assert!(!timers.is_scheduled(TimerKey::StackWindow));
        assert!(timers.fire_due(at(10_000)).is_empty());
    }
}
