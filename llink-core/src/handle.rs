/// The uniform operation surface every caller uses
///
/// Business code holds an `Arc<dyn DatabaseHandle>` chosen once at startup
/// and never branches on which implementation sits behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::value::{Params, Row};
use crate::{Error, Result};

/// Which implementation backs a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Direct connection to the embedded engine
    Local,
    /// Proxied over HTTP to a server instance
    Remote,
}

/// Statement execution style, as named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMethod {
    /// Every row
    All,
    /// First row or nothing
    Get,
    /// No rows, returns insert id and change count
    Run,
}

impl QueryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMethod::All => "all",
            QueryMethod::Get => "get",
            QueryMethod::Run => "run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(QueryMethod::All),
            "get" => Some(QueryMethod::Get),
            "run" => Some(QueryMethod::Run),
            _ => None,
        }
    }
}

/// Result of a write statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    #[serde(rename = "lastID")]
    pub last_insert_id: i64,
    pub changes: u64,
}

/// Method-shaped result of a single statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Exec(ExecResult),
}

impl QueryOutput {
    /// Wire representation: `{rows}`, `{row}` or `{lastID, changes}`.
    pub fn to_json(&self) -> Value {
        match self {
            QueryOutput::Rows(rows) => json!({ "rows": rows }),
            QueryOutput::Row(row) => json!({ "row": row }),
            QueryOutput::Exec(res) => json!({ "lastID": res.last_insert_id, "changes": res.changes }),
        }
    }
}

/// Database operations shared by local and remote handles
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Which implementation this is
    fn kind(&self) -> HandleKind;

    /// Run a query and return every row
    async fn query_all(&self, sql: &str, params: Params) -> Result<Vec<Row>>;

    /// Run a query and return the first row, if any
    async fn query_one(&self, sql: &str, params: Params) -> Result<Option<Row>>;

    /// Run a statement for its side effects
    async fn execute(&self, sql: &str, params: Params) -> Result<ExecResult>;

    /// Prepare a statement for repeated execution
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Dispatch by wire method name
    async fn run_method(&self, method: QueryMethod, sql: &str, params: Params) -> Result<QueryOutput> {
        match method {
            QueryMethod::All => self.query_all(sql, params).await.map(QueryOutput::Rows),
            QueryMethod::Get => self.query_one(sql, params).await.map(QueryOutput::Row),
            QueryMethod::Run => self.execute(sql, params).await.map(QueryOutput::Exec),
        }
    }
}

/// A statement executed once per `run` call
///
/// Runs are independent: a failing run does not roll back the others.
/// `finalize` waits for every run and reports the first failure.
#[async_trait]
pub trait PreparedStatement: Send {
    fn sql(&self) -> &str;

    /// Start one execution; its outcome is reported by `finalize`
    fn run(&mut self, params: Params);

    /// Number of runs issued so far
    fn pending(&self) -> usize;

    /// Wait for all runs; returns the first error encountered
    async fn finalize(self: Box<Self>) -> Result<()>;
}

/// Keep the first error of a batch, log the rest.
pub(crate) fn keep_first(first: &mut Option<Error>, err: Error) {
    if first.is_none() {
        *first = Some(err);
    } else {
        tracing::debug!(error = %err, "Additional batch failure");
    }
}
