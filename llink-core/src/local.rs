/// Direct embedded-engine handle (server mode)
///
/// One SQLite connection behind a mutex; every statement runs on the
/// blocking pool so async callers never stall the runtime.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::handle::{keep_first, DatabaseHandle, ExecResult, HandleKind, PreparedStatement};
use crate::value::{row_to_json, to_sql_value, Params, Row};
use crate::{Error, Result};

type SharedConn = Arc<Mutex<Option<Connection>>>;

/// Handle over a local SQLite connection
#[derive(Clone)]
pub struct LocalDatabaseHandle {
    conn: SharedConn,
    path: Option<PathBuf>,
}

impl LocalDatabaseHandle {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened local database");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        })
    }

    /// Path of the backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Close the connection so the file can be moved or encrypted.
    ///
    /// Every clone of this handle observes the close. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let taken = self.conn.lock().take();
        if let Some(conn) = taken {
            conn.close().map_err(|(_, e)| Error::Engine(e))?;
            debug!("Closed local database");
        }
        Ok(())
    }

    /// Run a batch of semicolon-separated statements without parameters.
    ///
    /// Intended for schema setup by the owning process, not for network callers.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql).map_err(Error::from))
            .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or(Error::Closed)?;
            f(conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }
}

fn bind(params: &[Value]) -> Vec<SqlValue> {
    params.iter().map(to_sql_value).collect()
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn query_all_sync(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns = column_names(&stmt);
    let rows = stmt
        .query_map(params_from_iter(bind(params)), |row| row_to_json(row, &columns))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn query_one_sync(conn: &Connection, sql: &str, params: &[Value]) -> Result<Option<Row>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns = column_names(&stmt);
    let mut rows = stmt.query(params_from_iter(bind(params)))?;
    let first = match rows.next()? {
        Some(row) => Some(row_to_json(row, &columns)?),
        None => None,
    };
    Ok(first)
}

fn execute_sync(conn: &Connection, sql: &str, params: &[Value]) -> Result<ExecResult> {
    let mut stmt = conn.prepare_cached(sql)?;
    let changes = if stmt.column_count() > 0 {
        // Row-returning statement (SELECT, or a write with RETURNING):
        // step through and discard, then ask the engine what changed
        let before = total_changes(conn)?;
        let mut rows = stmt.query(params_from_iter(bind(params)))?;
        while rows.next()?.is_some() {}
        drop(rows);
        if total_changes(conn)? == before {
            0
        } else {
            conn.query_row("SELECT changes()", [], |row| row.get::<_, i64>(0))? as u64
        }
    } else {
        stmt.execute(params_from_iter(bind(params)))? as u64
    };
    Ok(ExecResult {
        last_insert_id: conn.last_insert_rowid(),
        changes,
    })
}

fn total_changes(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT total_changes()", [], |row| row.get(0))?)
}

#[async_trait]
impl DatabaseHandle for LocalDatabaseHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::Local
    }

    async fn query_all(&self, sql: &str, params: Params) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| query_all_sync(conn, &sql, &params))
            .await
    }

    async fn query_one(&self, sql: &str, params: Params) -> Result<Option<Row>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| query_one_sync(conn, &sql, &params))
            .await
    }

    async fn execute(&self, sql: &str, params: Params) -> Result<ExecResult> {
        let sql = sql.to_string();
        self.with_conn(move |conn| execute_sync(conn, &sql, &params))
            .await
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        // Compile once up front so syntax errors surface at prepare time
        let owned = sql.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached(&owned)?;
            Ok(())
        })
        .await?;

        Ok(Box::new(LocalPrepared {
            conn: Arc::clone(&self.conn),
            sql: sql.to_string(),
            runs: 0,
            first_error: None,
        }))
    }
}

/// Prepared statement over the local connection
///
/// Each `run` executes at once on the shared connection, so its effect is
/// visible before `finalize` and survives a dropped statement. Failures are
/// held back and the first one is reported by `finalize`.
struct LocalPrepared {
    conn: SharedConn,
    sql: String,
    runs: usize,
    first_error: Option<Error>,
}

#[async_trait]
impl PreparedStatement for LocalPrepared {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn run(&mut self, params: Params) {
        self.runs += 1;
        let result = {
            let guard = self.conn.lock();
            match guard.as_ref() {
                Some(conn) => execute_sync(conn, &self.sql, &params),
                None => Err(Error::Closed),
            }
        };
        if let Err(e) = result {
            keep_first(&mut self.first_error, e);
        }
    }

    fn pending(&self) -> usize {
        self.runs
    }

    async fn finalize(self: Box<Self>) -> Result<()> {
        self.first_error.map_or(Ok(()), Err)
    }
}
