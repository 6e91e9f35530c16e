//! Expectation-driven stand-in for a PostgreSQL connection.
//!
//! Expectations are registered up front and consumed strictly in order. Each call
//! checks the next pending expectation: SQL is matched with a regular expression and
//! arguments (when given) must be equal. A call that does not match fails with
//! `BenchError::MockError` and leaves the expectation pending.
//!
//! ```rust,ignore
//! let db = MockDatabase::new();
//! db.expect(ExpectExec::new("INSERT.*").with_args(vec![RowValue::Int(1)]).will_return_result(1));
//! assert_eq!(db.execute("INSERT INTO t VALUES ($1)", &[RowValue::Int(1)]).await?, 1);
//! db.expectations_were_met()?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use regex::Regex;

use crate::database::{Batch, CopyRows, Database, DbRowStream, Transaction};
use crate::error::BenchError;
use crate::types::{DbRow, RowValue};

/// Expected `execute`, inside or outside a transaction or batch.
#[derive(Debug, Clone)]
pub struct ExpectExec {
    pattern: Regex,
    args: Option<Vec<RowValue>>,
    outcome: Result<u64, String>,
    times: usize,
}

impl ExpectExec {
    /// # Panics
    /// Panics if `pattern` is not a valid regular expression.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: compile(pattern),
            args: None,
            outcome: Ok(0),
            times: 1,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<RowValue>) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn will_return_result(mut self, rows_affected: u64) -> Self {
        self.outcome = Ok(rows_affected);
        self
    }

    #[must_use]
    pub fn will_return_error(mut self, message: impl Into<String>) -> Self {
        self.outcome = Err(message.into());
        self
    }

    /// Expect the same call `times` times in a row.
    #[must_use]
    pub fn times(mut self, times: usize) -> Self {
        self.times = times.max(1);
        self
    }

    fn check(&self, sql: &str, params: &[RowValue]) -> Result<(), String> {
        check_call(&self.pattern, self.args.as_deref(), sql, params)
    }
}

/// Canned result rows, optionally failing at a given row index.
#[derive(Debug, Clone)]
pub struct MockRows {
    columns: Arc<Vec<String>>,
    rows: Vec<Vec<RowValue>>,
    row_errors: HashMap<usize, String>,
}

impl MockRows {
    #[must_use]
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: Arc::new(columns.iter().map(ToString::to_string).collect()),
            rows: Vec::new(),
            row_errors: HashMap::new(),
        }
    }

    #[must_use]
    pub fn add_row(mut self, values: Vec<RowValue>) -> Self {
        self.rows.push(values);
        self
    }

    /// Reading row `index` fails with `message`; no later rows are produced.
    #[must_use]
    pub fn row_error(mut self, index: usize, message: impl Into<String>) -> Self {
        self.row_errors.insert(index, message.into());
        self
    }

    fn into_results(self) -> Vec<Result<DbRow, BenchError>> {
        let mut out = Vec::with_capacity(self.rows.len());
        for (index, values) in self.rows.into_iter().enumerate() {
            if let Some(message) = self.row_errors.get(&index) {
                out.push(Err(BenchError::MockError(message.clone())));
                return out;
            }
            out.push(Ok(DbRow::new(Arc::clone(&self.columns), values)));
        }
        out
    }
}

/// Expected `query`, `query_stream` or `query_one`.
#[derive(Debug, Clone)]
pub struct ExpectQuery {
    pattern: Regex,
    args: Option<Vec<RowValue>>,
    outcome: Result<MockRows, String>,
    times: usize,
}

impl ExpectQuery {
    /// # Panics
    /// Panics if `pattern` is not a valid regular expression.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: compile(pattern),
            args: None,
            outcome: Ok(MockRows::new(&[])),
            times: 1,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<RowValue>) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn will_return_rows(mut self, rows: MockRows) -> Self {
        self.outcome = Ok(rows);
        self
    }

    #[must_use]
    pub fn will_return_error(mut self, message: impl Into<String>) -> Self {
        self.outcome = Err(message.into());
        self
    }

    #[must_use]
    pub fn times(mut self, times: usize) -> Self {
        self.times = times.max(1);
        self
    }
}

/// Expected `copy_in` of `columns` into `table`.
#[derive(Debug, Clone)]
pub struct ExpectCopyFrom {
    table: String,
    columns: Vec<String>,
    outcome: Result<u64, String>,
}

impl ExpectCopyFrom {
    #[must_use]
    pub fn new(table: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(ToString::to_string).collect(),
            outcome: Ok(0),
        }
    }

    #[must_use]
    pub fn will_return_result(mut self, rows_copied: u64) -> Self {
        self.outcome = Ok(rows_copied);
        self
    }

    #[must_use]
    pub fn will_return_error(mut self, message: impl Into<String>) -> Self {
        self.outcome = Err(message.into());
        self
    }
}

/// One pending call on a [`MockDatabase`].
#[derive(Debug, Clone)]
pub enum Expectation {
    Exec(ExpectExec),
    Query(ExpectQuery),
    Begin(Option<String>),
    Commit(Option<String>),
    Rollback(Option<String>),
    /// A batch whose statements must match these, in order.
    Batch(Vec<ExpectExec>),
    CopyFrom(ExpectCopyFrom),
}

impl Expectation {
    #[must_use]
    pub fn begin() -> Self {
        Expectation::Begin(None)
    }

    #[must_use]
    pub fn commit() -> Self {
        Expectation::Commit(None)
    }

    #[must_use]
    pub fn rollback() -> Self {
        Expectation::Rollback(None)
    }

    #[must_use]
    pub fn batch(statements: Vec<ExpectExec>) -> Self {
        Expectation::Batch(statements)
    }

    /// The same expectation, failing with `message` when reached.
    #[must_use]
    pub fn will_return_error(self, message: impl Into<String>) -> Self {
        let message = message.into();
        match self {
            Expectation::Exec(e) => Expectation::Exec(e.will_return_error(message)),
            Expectation::Query(q) => Expectation::Query(q.will_return_error(message)),
            Expectation::Begin(_) => Expectation::Begin(Some(message)),
            Expectation::Commit(_) => Expectation::Commit(Some(message)),
            Expectation::Rollback(_) => Expectation::Rollback(Some(message)),
            Expectation::CopyFrom(c) => Expectation::CopyFrom(c.will_return_error(message)),
            Expectation::Batch(mut statements) => {
                if let Some(last) = statements.pop() {
                    statements.push(last.will_return_error(message));
                }
                Expectation::Batch(statements)
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Expectation::Exec(_) => "exec",
            Expectation::Query(_) => "query",
            Expectation::Begin(_) => "begin",
            Expectation::Commit(_) => "commit",
            Expectation::Rollback(_) => "rollback",
            Expectation::Batch(_) => "batch",
            Expectation::CopyFrom(_) => "copy from",
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Exec(e) => write!(f, "exec matching {:?} ({} left)", e.pattern.as_str(), e.times),
            Expectation::Query(q) => {
                write!(f, "query matching {:?} ({} left)", q.pattern.as_str(), q.times)
            }
            Expectation::Batch(statements) => write!(f, "batch of {} statements", statements.len()),
            Expectation::CopyFrom(c) => write!(f, "copy from {} {:?}", c.table, c.columns),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<ExpectExec> for Expectation {
    fn from(value: ExpectExec) -> Self {
        Expectation::Exec(value)
    }
}

impl From<ExpectQuery> for Expectation {
    fn from(value: ExpectQuery) -> Self {
        Expectation::Query(value)
    }
}

impl From<ExpectCopyFrom> for Expectation {
    fn from(value: ExpectCopyFrom) -> Self {
        Expectation::CopyFrom(value)
    }
}

/// A [`Database`] that replays registered expectations.
#[derive(Debug, Default)]
pub struct MockDatabase {
    pending: Mutex<VecDeque<Expectation>>,
    closed: AtomicBool,
}

impl MockDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next expected call.
    pub fn expect(&self, expectation: impl Into<Expectation>) {
        self.lock().push_back(expectation.into());
    }

    /// # Errors
    /// Lists every expectation that was never consumed.
    pub fn expectations_were_met(&self) -> Result<(), BenchError> {
        let pending = self.lock();
        if pending.is_empty() {
            return Ok(());
        }
        let remaining = pending
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Err(BenchError::MockError(format!(
            "there are remaining expectations which were not met: {remaining}"
        )))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Expectation>> {
        // a panicking test poisons the lock; the queue itself stays consistent
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn next_exec(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError> {
        let mut pending = self.lock();
        let outcome = match pending.front_mut() {
            Some(Expectation::Exec(expected)) => {
                expected.check(sql, params).map_err(BenchError::MockError)?;
                expected.times -= 1;
                expected.outcome.clone()
            }
            other => return Err(unexpected("exec", sql, other.as_deref())),
        };
        if matches!(pending.front(), Some(Expectation::Exec(e)) if e.times == 0) {
            pending.pop_front();
        }
        outcome.map_err(BenchError::MockError)
    }

    fn next_query(&self, sql: &str, params: &[RowValue]) -> Result<MockRows, BenchError> {
        let mut pending = self.lock();
        let outcome = match pending.front_mut() {
            Some(Expectation::Query(expected)) => {
                check_call(&expected.pattern, expected.args.as_deref(), sql, params)
                    .map_err(BenchError::MockError)?;
                expected.times -= 1;
                expected.outcome.clone()
            }
            other => return Err(unexpected("query", sql, other.as_deref())),
        };
        if matches!(pending.front(), Some(Expectation::Query(q)) if q.times == 0) {
            pending.pop_front();
        }
        outcome.map_err(BenchError::MockError)
    }

    fn next_tx_step(&self, kind: &'static str) -> Result<(), BenchError> {
        let mut pending = self.lock();
        let outcome = match pending.front() {
            Some(Expectation::Begin(err)) if kind == "begin" => err.clone(),
            Some(Expectation::Commit(err)) if kind == "commit" => err.clone(),
            Some(Expectation::Rollback(err)) if kind == "rollback" => err.clone(),
            other => return Err(unexpected(kind, "", other)),
        };
        pending.pop_front();
        match outcome {
            Some(message) => Err(BenchError::MockError(message)),
            None => Ok(()),
        }
    }

    fn next_batch(&self, batch: &Batch) -> Result<Vec<u64>, BenchError> {
        let mut pending = self.lock();
        let Some(Expectation::Batch(expected)) = pending.front() else {
            return Err(unexpected("batch", "", pending.front()));
        };

        let expected_len: usize = expected.iter().map(|e| e.times).sum();
        if expected_len != batch.len() {
            return Err(BenchError::MockError(format!(
                "batch has {} statements, expected {expected_len}",
                batch.len()
            )));
        }

        let mut counts = Vec::with_capacity(batch.len());
        let mut failure = None;
        let mut queued = batch.iter();
        for statement in expected {
            for _ in 0..statement.times {
                let Some(actual) = queued.next() else { break };
                statement
                    .check(&actual.query, &actual.params)
                    .map_err(BenchError::MockError)?;
                match &statement.outcome {
                    Ok(count) => counts.push(*count),
                    Err(message) => {
                        failure.get_or_insert_with(|| message.clone());
                    }
                }
            }
        }

        pending.pop_front();
        match failure {
            Some(message) => Err(BenchError::MockError(message)),
            None => Ok(counts),
        }
    }

    fn next_copy(&self, table: &str, columns: &[&str]) -> Result<Result<u64, String>, BenchError> {
        let mut pending = self.lock();
        let outcome = match pending.front() {
            Some(Expectation::CopyFrom(expected)) => {
                if expected.table != table || expected.columns != columns {
                    return Err(BenchError::MockError(format!(
                        "copy into {table} {columns:?} does not match expected {} {:?}",
                        expected.table, expected.columns
                    )));
                }
                expected.outcome.clone()
            }
            other => return Err(unexpected("copy from", table, other)),
        };
        pending.pop_front();
        Ok(outcome)
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError> {
        self.next_exec(sql, params)
    }

    async fn query(&self, sql: &str, params: &[RowValue]) -> Result<Vec<DbRow>, BenchError> {
        self.next_query(sql, params)?.into_results().into_iter().collect()
    }

    async fn query_stream<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [RowValue],
    ) -> Result<DbRowStream<'a>, BenchError> {
        let rows = self.next_query(sql, params)?;
        Ok(stream::iter(rows.into_results()).boxed())
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, BenchError> {
        self.next_tx_step("begin")?;
        Ok(Box::new(MockTransaction { db: self }))
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Vec<u64>, BenchError> {
        self.next_batch(batch)
    }

    async fn copy_in(
        &self,
        table: &str,
        columns: &[&str],
        rows: CopyRows<'_>,
    ) -> Result<u64, BenchError> {
        let outcome = self.next_copy(table, columns)?;
        for row in rows {
            row?;
        }
        outcome.map_err(BenchError::MockError)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MockTransaction<'a> {
    db: &'a MockDatabase,
}

#[async_trait]
impl Transaction for MockTransaction<'_> {
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError> {
        self.db.next_exec(sql, params)
    }

    async fn commit(self: Box<Self>) -> Result<(), BenchError> {
        self.db.next_tx_step("commit")
    }

    async fn rollback(self: Box<Self>) -> Result<(), BenchError> {
        self.db.next_tx_step("rollback")
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid mock pattern {pattern:?}: {e}"))
}

fn check_call(
    pattern: &Regex,
    args: Option<&[RowValue]>,
    sql: &str,
    params: &[RowValue],
) -> Result<(), String> {
    if !pattern.is_match(sql) {
        return Err(format!(
            "query {sql:?} does not match expected pattern {:?}",
            pattern.as_str()
        ));
    }
    if let Some(expected) = args {
        if expected != params {
            return Err(format!(
                "arguments {params:?} do not match expected {expected:?} for {sql:?}"
            ));
        }
    }
    Ok(())
}

fn unexpected(call: &str, sql: &str, next: Option<&Expectation>) -> BenchError {
    let next = next.map_or_else(|| "nothing".to_string(), ToString::to_string);
    BenchError::MockError(format!(
        "call to {call} {sql:?} was not expected, next expectation is {next}"
    ))
}
