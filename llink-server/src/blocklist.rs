/// SQL statements the proxy refuses regardless of caller.
///
/// Schema changes, pragmas and database attachment are local-only
/// operations; over the network the match is a plain case-insensitive scan
/// of the statement text.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BLOCKED: Regex = Regex::new(
        r"(?i)\b(?:DROP|ALTER|ATTACH|DETACH|PRAGMA|VACUUM|REINDEX|TRUNCATE)\b|\bCREATE\s+(?:TABLE|INDEX)\b"
    )
    .unwrap();
}

/// Returns true if `sql` must not reach the engine.
pub fn is_blocked(sql: &str) -> bool {
    BLOCKED.is_match(sql)
}
