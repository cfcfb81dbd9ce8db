/// Query log
///
/// Every accepted statement is logged twice: into a bounded in-memory ring
/// that backs `/monitoring`, and as one JSON line appended to an optional
/// access-log file. The file is trimmed to its newest lines once it grows
/// past the rotation threshold.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Engine errors are cut to this many characters before logging.
const ERROR_LOG_CHARS: usize = 100;

/// One proxied statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogEntry {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub method: String,
    pub sql: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryLogEntry {
    pub fn new(
        ip: impl Into<String>,
        method: impl Into<String>,
        sql: &str,
        sql_chars: usize,
        duration: Duration,
        error: Option<&str>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            ip: ip.into(),
            method: method.into(),
            sql: truncate_chars(sql, sql_chars),
            success: error.is_none(),
            duration_ms: duration.as_millis() as u64,
            error: error.map(|e| truncate_chars(e, ERROR_LOG_CHARS)),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug)]
struct FileSink {
    path: PathBuf,
    rotate_bytes: u64,
    retain_lines: usize,
}

impl FileSink {
    fn append(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        let size = file.metadata()?.len();
        drop(file);

        if size > self.rotate_bytes {
            rotate(&self.path, self.retain_lines)?;
        }
        Ok(())
    }
}

/// Keep only the newest `retain` lines of `path`.
fn rotate(path: &Path, retain: usize) -> io::Result<()> {
    let contents = fs::read_to_string(path)?;
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(retain);

    let mut kept = lines[start..].join("\n");
    if !kept.is_empty() {
        kept.push('\n');
    }

    let staging = path.with_extension("jsonl.tmp");
    fs::write(&staging, kept)?;
    fs::rename(&staging, path)
}

/// Aggregate counters for the monitoring view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCounts {
    pub total: u64,
    pub failed: u64,
}

/// Bounded in-memory log plus optional file sink
#[derive(Debug)]
pub struct QueryLog {
    capacity: usize,
    entries: Mutex<VecDeque<QueryLogEntry>>,
    sink: Option<Arc<Mutex<FileSink>>>,
    total: AtomicU64,
    failed: AtomicU64,
}

impl QueryLog {
    /// In-memory only
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            sink: None,
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Also append to `path`, trimming to `retain_lines` past `rotate_bytes`
    pub fn with_file(mut self, path: impl Into<PathBuf>, rotate_bytes: u64, retain_lines: usize) -> Self {
        self.sink = Some(Arc::new(Mutex::new(FileSink {
            path: path.into(),
            rotate_bytes,
            retain_lines,
        })));
        self
    }

    /// Record an entry in both sinks. File errors are logged, never returned.
    ///
    /// The file write runs on the blocking pool; it is awaited so lines land
    /// in the order callers record them.
    pub async fn record(&self, entry: QueryLogEntry) {
        let line = match &self.sink {
            Some(_) => match serde_json::to_string(&entry) {
                Ok(line) => Some(line),
                Err(e) => {
                    warn!(error = %e, "Failed to serialize query log entry");
                    None
                }
            },
            None => None,
        };

        self.push(entry);

        if let (Some(sink), Some(line)) = (&self.sink, line) {
            let sink = Arc::clone(sink);
            let written = tokio::task::spawn_blocking(move || {
                let sink = sink.lock();
                sink.append(&line).map_err(|e| (sink.path.clone(), e))
            })
            .await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err((path, e))) => {
                    warn!(path = %path.display(), error = %e, "Failed to write query log")
                }
                Err(e) => warn!(error = %e, "Query log writer task failed"),
            }
        }
    }

    fn push(&self, entry: QueryLogEntry) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !entry.success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<QueryLogEntry> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All-time counts, not limited by the ring size
    pub fn counts(&self) -> QueryCounts {
        QueryCounts {
            total: self.total.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(n: usize, ok: bool) -> QueryLogEntry {
        let error = if ok { None } else { Some("no such table: x") };
        QueryLogEntry::new("10.0.0.2", "all", &format!("SELECT {}", n), 200, Duration::from_millis(3), error)
    }

    #[tokio::test]
    async fn test_ring_is_bounded() {
        let log = QueryLog::new(500);
        for n in 0..600 {
            log.record(entry(n, n % 10 != 0)).await;
        }
        assert_eq!(log.len(), 500);
        assert_eq!(log.counts(), QueryCounts { total: 600, failed: 60 });

        let recent = log.recent(100);
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].sql, "SELECT 599");
        assert_eq!(recent[99].sql, "SELECT 500");
    }

    #[test]
    fn test_entry_truncates() {
        let sql = "x".repeat(300);
        let err = "é".repeat(150);
        let e = QueryLogEntry::new("ip", "run", &sql, 200, Duration::ZERO, Some(&err));
        assert_eq!(e.sql.chars().count(), 200);
        assert_eq!(e.error.unwrap().chars().count(), ERROR_LOG_CHARS);
        assert!(!e.success);
    }

    #[test]
    fn test_entry_json_shape() {
        let json = serde_json::to_value(entry(1, true)).unwrap();
        assert_eq!(json["durationMs"], 3);
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("query-log.jsonl");
        let log = QueryLog::new(10).with_file(&path, 5 * 1024 * 1024, 1000);

        log.record(entry(1, true)).await;
        log.record(entry(2, false)).await;

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<QueryLogEntry> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].sql, "SELECT 2");
        assert!(!lines[1].success);
    }

    #[tokio::test]
    async fn test_file_sink_rotates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("query-log.jsonl");
        let log = QueryLog::new(10).with_file(&path, 2048, 5);

        for n in 0..50 {
            log.record(entry(n, true)).await;
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.len() <= 2048 + 200);
        let last: QueryLogEntry = serde_json::from_str(contents.lines().last().unwrap()).unwrap();
        assert_eq!(last.sql, "SELECT 49");
        assert!(!dir.path().join("query-log.jsonl.tmp").exists());
    }
}
