//! Sliding-window per-user rate limiting with two independent counters
//! (§4.2): total requests and security-blocked requests.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitVerdict {
    Allowed,
    Denied { retry_after_secs: i64 },
}

struct UserWindow {
    total: Mutex<VecDeque<Instant>>,
    blocked: Mutex<VecDeque<Instant>>,
}

impl UserWindow {
    fn new() -> Self {
        Self {
            total: Mutex::new(VecDeque::new()),
            blocked: Mutex::new(VecDeque::new()),
        }
    }
}

/// Process-wide per-user sliding-window limiter. Users are fully isolated:
/// one user's entries never affect another's counters (P5).
pub struct RateLimiter {
    global_limit: usize,
    blocked_limit: usize,
    window: Duration,
    users: DashMap<String, UserWindow>,
}

impl RateLimiter {
    pub fn new(global_limit: usize, blocked_limit: usize, window_seconds: i64) -> Self {
        Self {
            global_limit,
            blocked_limit,
            window: Duration::from_secs(window_seconds.max(0) as u64),
            users: DashMap::new(),
        }
    }

    fn prune(&self, queue: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = queue.front() {
            if now.duration_since(*front) >= self.window {
                queue.pop_front();
            } else {
                break;
            }
        }
    }

    fn retry_after(&self, queue: &VecDeque<Instant>, now: Instant) -> i64 {
        match queue.front() {
            Some(oldest) => {
                let age = now.duration_since(*oldest);
                (self.window.as_secs() as i64 - age.as_secs() as i64).max(0)
            }
            None => self.window.as_secs() as i64,
        }
    }

    /// Non-recording pre-check: would a new request be allowed right now.
    pub fn check_only(&self, user_id: &str) -> RateLimitVerdict {
        let now = Instant::now();
        let entry = self.users.entry(user_id.to_string()).or_insert_with(UserWindow::new);
        let mut total = entry.total.lock().unwrap();
        self.prune(&mut total, now);
        if total.len() >= self.global_limit {
            return RateLimitVerdict::Denied {
                retry_after_secs: self.retry_after(&total, now),
            };
        }
        let mut blocked = entry.blocked.lock().unwrap();
        self.prune(&mut blocked, now);
        if blocked.len() >= self.blocked_limit {
            return RateLimitVerdict::Denied {
                retry_after_secs: self.retry_after(&blocked, now),
            };
        }
        RateLimitVerdict::Allowed
    }

    /// Atomically prune, evaluate both limits, and if allowed, record the
    /// new event. `was_blocked` indicates the preflight outcome for this
    /// request, feeding the security-blocked counter.
    pub fn check_and_record(&self, user_id: &str, was_blocked: bool) -> RateLimitVerdict {
        let now = Instant::now();
        let entry = self.users.entry(user_id.to_string()).or_insert_with(UserWindow::new);
        let mut total = entry.total.lock().unwrap();
        self.prune(&mut total, now);
        if total.len() >= self.global_limit {
            return RateLimitVerdict::Denied {
                retry_after_secs: self.retry_after(&total, now),
            };
        }

        if was_blocked {
            let mut blocked = entry.blocked.lock().unwrap();
            self.prune(&mut blocked, now);
            if blocked.len() >= self.blocked_limit {
                return RateLimitVerdict::Denied {
                    retry_after_secs: self.retry_after(&blocked, now),
                };
            }
            blocked.push_back(now);
        }

        total.push_back(now);
        RateLimitVerdict::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_under_limit() {
        let limiter = RateLimiter::new(100, 5, 60);
        for _ in 0..5 {
            assert_eq!(limiter.check_and_record("u1", false), RateLimitVerdict::Allowed);
        }
    }

    #[test]
    fn test_blocked_limit_triggers_after_threshold() {
        let limiter = RateLimiter::new(100, 2, 60);
        assert_eq!(limiter.check_and_record("u1", true), RateLimitVerdict::Allowed);
        assert_eq!(limiter.check_and_record("u1", true), RateLimitVerdict::Allowed);
        match limiter.check_and_record("u1", true) {
            RateLimitVerdict::Denied { retry_after_secs } => assert!(retry_after_secs > 0),
            RateLimitVerdict::Allowed => panic!("expected denial on third blocked request"),
        }
    }

    #[test]
    fn test_users_are_isolated() {
        let limiter = RateLimiter::new(100, 1, 60);
        assert_eq!(limiter.check_and_record("u1", true), RateLimitVerdict::Allowed);
        assert!(matches!(
            limiter.check_and_record("u1", true),
            RateLimitVerdict::Denied { .. }
        ));
        assert_eq!(limiter.check_and_record("u2", true), RateLimitVerdict::Allowed);
    }

    #[test]
    fn test_check_only_does_not_record() {
        let limiter = RateLimiter::new(1, 5, 60);
        assert_eq!(limiter.check_only("u1"), RateLimitVerdict::Allowed);
        assert_eq!(limiter.check_only("u1"), RateLimitVerdict::Allowed);
        assert_eq!(limiter.check_and_record("u1", false), RateLimitVerdict::Allowed);
        assert!(matches!(
            limiter.check_and_record("u1", false),
            RateLimitVerdict::Denied { .. }
        ));
    }

    proptest::proptest! {
        /// P5: exhausting user A's blocked_limit never changes user B's
        /// allow/deny decision.
        #[test]
        fn prop_blocking_one_user_never_affects_another(blocked_limit in 1usize..10, extra_for_a in 0usize..10) {
            let limiter = RateLimiter::new(1000, blocked_limit, 60);
            for _ in 0..(blocked_limit + extra_for_a) {
                limiter.check_and_record("user-a", true);
            }
            prop_assert_eq!(limiter.check_and_record("user-b", true), RateLimitVerdict::Allowed);
        }
    }
}
