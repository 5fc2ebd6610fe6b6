use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::config::settings::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    created_at: Instant,
}

impl CounterEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 1,
            created_at: now,
        }
    }
}

/// Per-client request counter keyed by UTC calendar minute.
///
/// The first request in a bucket starts the count at 1 and is allowed; a
/// later request is blocked once the count has reached the threshold, so
/// request N in a minute is blocked iff N > threshold.
///
/// Entries expire a fixed TTL after creation regardless of the minute they
/// belong to. The map is capped at `max_entries`: when full, expired entries
/// are evicted first and then the oldest-created one.
pub struct RateLimiter {
    entries: DashMap<String, CounterEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries.max(1),
        }
    }

    /// `clientIP_YYYY-MM-DDTHH:MM`
    pub fn bucket_key(client_ip: &str, at: DateTime<Utc>) -> String {
        format!("{}_{}", client_ip, at.format("%Y-%m-%dT%H:%M"))
    }

    pub fn should_block(&self, client_ip: &str, threshold: u64) -> bool {
        self.check_at(client_ip, threshold, Utc::now(), Instant::now())
    }

    /// Count one request at the given wall-clock minute and monotonic instant.
    pub fn check_at(&self, client_ip: &str, threshold: u64, wall: DateTime<Utc>, now: Instant) -> bool {
        let key = Self::bucket_key(client_ip, wall);

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict(now);
        }

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now.saturating_duration_since(entry.created_at) >= self.ttl {
                    *entry = CounterEntry::fresh(now);
                    false
                } else if entry.count >= threshold {
                    debug!(ip = client_ip, count = entry.count, threshold = threshold, "rate limit exceeded");
                    true
                } else {
                    entry.count += 1;
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry::fresh(now));
                false
            }
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.remove_expired(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.created_at) < ttl);
        before.saturating_sub(self.entries.len())
    }

    fn evict(&self, now: Instant) {
        let expired = self.remove_expired(now);
        if self.entries.len() < self.max_entries {
            debug!(removed = expired, "rate limiter evicted expired entries");
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().created_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            debug!(key = %key, "rate limiter at capacity, evicted oldest entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter(ttl_secs: u64, max_entries: usize) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            ttl_secs,
            max_entries,
            cleanup_interval_secs: 30,
        })
    }

    fn minute(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, m, 5).unwrap()
    }

    #[test]
    fn key_format() {
        assert_eq!(
            RateLimiter::bucket_key("10.1.2.3", minute(7)),
            "10.1.2.3_2025-06-01T12:07"
        );
    }

    #[test]
    fn request_beyond_threshold_is_blocked() {
        let rl = limiter(60, 100);
        let now = Instant::now();

        for n in 1..=5 {
            assert!(!rl.check_at("10.0.0.1", 5, minute(0), now), "request {} allowed", n);
        }
        assert!(rl.check_at("10.0.0.1", 5, minute(0), now));
        assert!(rl.check_at("10.0.0.1", 5, minute(0), now));
    }

    #[test]
    fn clients_are_independent() {
        let rl = limiter(60, 100);
        let now = Instant::now();

        assert!(!rl.check_at("10.0.0.1", 1, minute(0), now));
        assert!(rl.check_at("10.0.0.1", 1, minute(0), now));
        assert!(!rl.check_at("10.0.0.2", 1, minute(0), now));
    }

    #[test]
    fn new_minute_starts_new_bucket() {
        let rl = limiter(60, 100);
        let now = Instant::now();

        assert!(!rl.check_at("10.0.0.1", 1, minute(0), now));
        assert!(rl.check_at("10.0.0.1", 1, minute(0), now));
        assert!(!rl.check_at("10.0.0.1", 1, minute(1), now));
    }

    #[test]
    fn zero_threshold_blocks_after_first() {
        let rl = limiter(60, 100);
        let now = Instant::now();

        assert!(!rl.check_at("10.0.0.1", 0, minute(0), now));
        assert!(rl.check_at("10.0.0.1", 0, minute(0), now));
    }

    #[test]
    fn expired_entry_counts_as_absent() {
        let rl = limiter(60, 100);
        let start = Instant::now();

        assert!(!rl.check_at("10.0.0.1", 1, minute(0), start));
        assert!(rl.check_at("10.0.0.1", 1, minute(0), start));

        let later = start + Duration::from_secs(61);
        assert!(!rl.check_at("10.0.0.1", 1, minute(0), later));
    }

    #[test]
    fn capacity_is_bounded() {
        let rl = limiter(60, 3);
        let start = Instant::now();

        for (i, ip) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            rl.check_at(ip, 10, minute(0), start + Duration::from_millis(i as u64));
        }
        assert_eq!(rl.len(), 3);

        assert!(!rl.entries.contains_key(&RateLimiter::bucket_key("a", minute(0))));
        assert!(!rl.entries.contains_key(&RateLimiter::bucket_key("b", minute(0))));
        // "e" survived with its count, so a threshold of 1 now blocks it.
        assert!(rl.check_at("e", 1, minute(0), start + Duration::from_millis(10)));
    }

    #[test]
    fn capacity_prefers_expired_entries() {
        let rl = limiter(1, 2);
        let start = Instant::now();

        rl.check_at("old", 10, minute(0), start);
        rl.check_at("fresh", 10, minute(0), start + Duration::from_millis(1500));
        // "old" is expired at this point and is the one evicted.
        rl.check_at("new", 10, minute(0), start + Duration::from_millis(1600));

        assert_eq!(rl.len(), 2);
        assert!(rl.entries.contains_key(&RateLimiter::bucket_key("fresh", minute(0))));
        assert!(rl.entries.contains_key(&RateLimiter::bucket_key("new", minute(0))));
    }

    #[test]
    fn cleanup_sweeps_expired() {
        let rl = limiter(0, 10);
        rl.check_at("10.0.0.1", 5, minute(0), Instant::now());
        assert_eq!(rl.cleanup(), 1);
        assert!(rl.is_empty());
    }
}
