/// Connection tracking for the monitoring view
///
/// The proxy is stateless per request, so a "connection" is simply a client
/// IP that has sent accepted queries. Activity is derived on read from the
/// last-seen time, so no timers are scheduled per request.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::metrics::TRACKED_CONNECTIONS;

#[derive(Debug, Clone)]
struct Activity {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    last_seen_at: Instant,
    query_count: u64,
}

/// One row of the monitoring connection table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub ip: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub query_count: u64,
    pub active: bool,
}

/// Tracks every client IP seen since startup
#[derive(Debug)]
pub struct ConnectionTracker {
    active_window: Duration,
    clients: Mutex<HashMap<IpAddr, Activity>>,
}

impl ConnectionTracker {
    /// Create a tracker; an IP counts as active for `active_window` after its last query
    pub fn new(active_window: Duration) -> Self {
        Self {
            active_window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Record an accepted query from `ip`
    pub fn record(&self, ip: IpAddr) {
        self.record_at(ip, Instant::now(), Utc::now());
    }

    pub fn record_at(&self, ip: IpAddr, at: Instant, wall: DateTime<Utc>) {
        let mut clients = self.clients.lock();
        let activity = clients.entry(ip).or_insert_with(|| {
            debug!(ip = %ip, "New client connection");
            Activity {
                first_seen: wall,
                last_seen: wall,
                last_seen_at: at,
                query_count: 0,
            }
        });
        activity.last_seen = wall;
        activity.last_seen_at = at;
        activity.query_count += 1;

        TRACKED_CONNECTIONS.set(clients.len() as i64);
    }

    /// Current table, most recently seen first
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> Vec<ConnectionRecord> {
        let clients = self.clients.lock();
        let mut records: Vec<ConnectionRecord> = clients
            .iter()
            .map(|(ip, a)| ConnectionRecord {
                ip: ip.to_string(),
                first_seen: a.first_seen,
                last_seen: a.last_seen,
                query_count: a.query_count,
                active: now.saturating_duration_since(a.last_seen_at) < self.active_window,
            })
            .collect();
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        records
    }

    /// Number of IPs ever seen
    pub fn total(&self) -> usize {
        self.clients.lock().len()
    }

    /// Number of IPs seen within the active window
    pub fn active_count_at(&self, now: Instant) -> usize {
        self.clients
            .lock()
            .values()
            .filter(|a| now.saturating_duration_since(a.last_seen_at) < self.active_window)
            .count()
    }
}
