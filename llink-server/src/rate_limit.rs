/// Per-IP rate limiting
///
/// Fixed windows: each IP gets `limit` requests per `window`, counted from
/// its first request in the window. State is in memory and resets on
/// restart.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::metrics::RATE_LIMITED_REQUESTS;

/// Expired windows are swept once the table grows past this many IPs.
const PRUNE_THRESHOLD: usize = 1024;

/// Request budget for one IP.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub count: u32,
    pub reset_at: Instant,
}

/// Fixed-window limiter keyed by client IP
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, RateLimitWindow>>,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` requests per `window` (0 = unlimited)
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request from `ip`; returns false once the budget is spent
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    pub fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }

        let mut windows = self.windows.lock();
        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| w.reset_at > now);
        }

        let entry = windows.entry(ip).or_insert(RateLimitWindow {
            count: 0,
            reset_at: now + self.window,
        });
        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        entry.count = entry.count.saturating_add(1);
        if entry.count > self.limit {
            warn!(ip = %ip, count = entry.count, limit = self.limit, "Rate limit exceeded");
            RATE_LIMITED_REQUESTS.inc();
            return false;
        }
        true
    }

    /// Number of IPs with a live or expired window
    pub fn tracked_ips(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([192, 168, 1, last])
    }

    #[test]
    fn test_unlimited() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        for _ in 0..1000 {
            assert!(limiter.check(ip(1)));
        }
        assert_eq!(limiter.tracked_ips(), 0);
    }

    #[test]
    fn test_limit_within_window() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        let start = Instant::now();
        for i in 0..100 {
            assert!(limiter.check_at(ip(1), start + Duration::from_millis(i)));
        }
        assert!(!limiter.check_at(ip(1), start + Duration::from_secs(1)));
        // Other IPs keep their own budget
        assert!(limiter.check_at(ip(2), start + Duration::from_secs(1)));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at(ip(1), start));
        assert!(limiter.check_at(ip(1), start));
        assert!(!limiter.check_at(ip(1), start + Duration::from_secs(59)));
        assert!(limiter.check_at(ip(1), start + Duration::from_secs(60)));
    }

    #[test]
    fn test_expired_windows_pruned() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        let start = Instant::now();
        for n in 0..=PRUNE_THRESHOLD as u32 {
            let addr = IpAddr::from(std::net::Ipv4Addr::from(0x0a00_0000 + n));
            limiter.check_at(addr, start);
        }
        assert_eq!(limiter.tracked_ips(), PRUNE_THRESHOLD + 1);

        limiter.check_at(ip(9), start + Duration::from_secs(2));
        assert_eq!(limiter.tracked_ips(), 1);
    }
}
