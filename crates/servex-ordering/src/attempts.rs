//! Per-table order attempt window.
//!
//! Fixed window: the first attempt opens a window of `window_secs`; at most
//! `max` attempts are accepted until it closes. State is process-local.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct TableAttemptLimiter {
    max: u32,
    window: Duration,
    windows: HashMap<Uuid, Window>,
}

impl TableAttemptLimiter {
    pub fn new(max: u32, window_secs: u64) -> Self {
        Self {
            max,
            window: Duration::seconds(window_secs.min(u64::from(u32::MAX)) as i64),
            windows: HashMap::new(),
        }
    }

    /// Record an attempt for `table_id`. Returns `false` when the table has
    /// used up its window.
    pub fn check(&mut self, table_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.windows.get_mut(&table_id) {
            Some(w) if now <= w.reset_at => {
                if w.count >= self.max {
                    return false;
                }
                w.count += 1;
                true
            }
            _ => {
                self.windows.insert(
                    table_id,
                    Window {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }

    /// Drop windows that have closed.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.windows.retain(|_, w| now <= w.reset_at);
    }

    pub fn tracked_tables(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_max_then_blocks() {
        let mut lim = TableAttemptLimiter::new(5, 600);
        let t = Uuid::new_v4();
        let now = Utc::now();
        for i in 0..5 {
            assert!(lim.check(t, now), "attempt {i} should pass");
        }
        assert!(!lim.check(t, now));
    }

    #[test]
    fn window_reopens_after_reset() {
        let mut lim = TableAttemptLimiter::new(1, 600);
        let t = Uuid::new_v4();
        let now = Utc::now();
        assert!(lim.check(t, now));
        assert!(!lim.check(t, now + Duration::seconds(600)));
        assert!(lim.check(t, now + Duration::seconds(601)));
    }

    #[test]
    fn tables_are_independent() {
        let mut lim = TableAttemptLimiter::new(1, 600);
        let now = Utc::now();
        assert!(lim.check(Uuid::new_v4(), now));
        assert!(lim.check(Uuid::new_v4(), now));
    }

    #[test]
    fn prune_drops_closed_windows() {
        let mut lim = TableAttemptLimiter::new(1, 60);
        let now = Utc::now();
        lim.check(Uuid::new_v4(), now);
        lim.check(Uuid::new_v4(), now + Duration::seconds(30));
        lim.prune(now + Duration::seconds(61));
        assert_eq!(lim.tracked_tables(), 1);
    }
}
