use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

/// Per-key sliding-window admission control.
///
/// Mirrors the bookkeeping of `hathor.p2p.rate_limiter.RateLimiter`: a
/// bounded deque of hit timestamps per key, pruned lazily on every
/// `add_hit` call. Keys without a configured limit always admit.
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: HashMap<String, Limit>,
    hits: HashMap<String, VecDeque<Instant>>,
}

#[derive(Debug, Clone, Copy)]
struct Limit {
    max_hits: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces the limit for `key`.
    pub fn set_limit(&mut self, key: impl Into<String>, max_hits: usize, window_seconds: f64) {
        let key = key.into();
        self.limits.insert(
            key.clone(),
            Limit {
                max_hits,
                window: Duration::from_secs_f64(window_seconds),
            },
        );
        self.hits.entry(key).or_default();
    }

    /// Returns true and records a hit iff fewer than `max_hits` hits occurred
    /// in the last `window_seconds`. Keys with no configured limit always
    /// admit without being recorded.
    pub fn add_hit(&mut self, key: &str) -> bool {
        self.add_hit_at(key, Instant::now())
    }

    /// Same as [`RateLimiter::add_hit`], but with an explicit clock — used by
    /// tests to exercise the sliding window deterministically.
    pub fn add_hit_at(&mut self, key: &str, now: Instant) -> bool {
        let Some(limit) = self.limits.get(key).copied() else {
            return true;
        };

        let deque = self.hits.entry(key.to_string()).or_default();
        let cutoff = now.checked_sub(limit.window).unwrap_or(now);
        while let Some(&front) = deque.front() {
            if front < cutoff {
                deque.pop_front();
            } else {
                break;
            }
        }

        if deque.len() < limit.max_hits {
            deque.push_back(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_without_a_configured_limit() {
        let mut limiter = RateLimiter::new();
        for _ in 0..1000 {
            assert!(limiter.add_hit("unbounded"));
        }
    }

    #[test]
    fn caps_hits_within_the_window() {
        let mut limiter = RateLimiter::new();
        limiter.set_limit("k", 3, 1.0);

        let t0 = Instant::now();
        assert!(limiter.add_hit_at("k", t0));
        assert!(limiter.add_hit_at("k", t0));
        assert!(limiter.add_hit_at("k", t0));
        assert!(!limiter.add_hit_at("k", t0));

        let after_window = t0 + Duration::from_millis(1100);
        assert!(limiter.add_hit_at("k", after_window));
    }

    #[test]
    fn evicts_only_entries_older_than_the_window() {
        let mut limiter = RateLimiter::new();
        limiter.set_limit("k", 2, 1.0);

        let t0 = Instant::now();
        assert!(limiter.add_hit_at("k", t0));
        let t1 = t0 + Duration::from_millis(600);
        assert!(limiter.add_hit_at("k", t1));
        // Third hit at t0+900ms: both earlier hits are still inside the 1s window.
        assert!(!limiter.add_hit_at("k", t0 + Duration::from_millis(900)));
        // At t0+1050ms the first hit (t0) has aged out, the second (t1) hasn't.
        assert!(limiter.add_hit_at("k", t0 + Duration::from_millis(1050)));
    }
}
