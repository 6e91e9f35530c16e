// Database module - the seam between the benchmarks and the driver
//
// - session: driver calls shared by both connection types
// - pool: deadpool-backed implementation
// - client: single tokio-postgres connection implementation

mod client;
mod pool;
mod session;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::BenchError;
use crate::types::{DbRow, RowValue};

pub use client::PgClient;
pub use pool::PgPool;

/// Rows decoded incrementally as they arrive from the server.
pub type DbRowStream<'a> = BoxStream<'a, Result<DbRow, BenchError>>;

/// Lazy, fallible source of rows for [`Database::copy_in`].
pub type CopyRows<'a> = Box<dyn Iterator<Item = Result<Vec<RowValue>, BenchError>> + Send + 'a>;

/// Build a [`CopyRows`] producing `len` rows, asking `row_at` for each index in turn.
pub fn copy_from_fn<'a, F>(len: usize, row_at: F) -> CopyRows<'a>
where
    F: FnMut(usize) -> Result<Vec<RowValue>, BenchError> + Send + 'a,
{
    Box::new((0..len).map(row_at))
}

/// A query and its parameters bundled together
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAndParams {
    /// The SQL query string
    pub query: String,
    /// The parameters to be bound to the query
    pub params: Vec<RowValue>,
}

impl QueryAndParams {
    pub fn new(query: impl Into<String>, params: Vec<RowValue>) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }
}

/// Statements queued to be sent to the server together.
///
/// Every statement of a batch is pipelined on one connection and applied inside a
/// single transaction, so a failing statement discards the whole batch.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    queued: Vec<QueryAndParams>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queued: Vec::with_capacity(capacity),
        }
    }

    pub fn queue(&mut self, query: impl Into<String>, params: Vec<RowValue>) {
        self.queued.push(QueryAndParams::new(query, params));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &QueryAndParams> {
        self.queued.iter()
    }
}

/// An open transaction. Dropping it without `commit` or `rollback` must not hand a
/// connection that is still inside the transaction back to a pool.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError>;
    async fn commit(self: Box<Self>) -> Result<(), BenchError>;
    async fn rollback(self: Box<Self>) -> Result<(), BenchError>;
}

/// The subset of a PostgreSQL driver the benchmarks exercise.
///
/// Implemented for a connection pool ([`PgPool`]) and a single connection
/// ([`PgClient`]); tests substitute an expectation-driven mock.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a statement and return the number of rows it affected.
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError>;

    /// Run a query and buffer every row before returning.
    async fn query(&self, sql: &str, params: &[RowValue]) -> Result<Vec<DbRow>, BenchError>;

    /// Run a query and decode rows one at a time as the caller polls.
    async fn query_stream<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [RowValue],
    ) -> Result<DbRowStream<'a>, BenchError>;

    /// First row of a query.
    ///
    /// # Errors
    /// `BenchError::NoRows` when the query returned nothing.
    async fn query_one(&self, sql: &str, params: &[RowValue]) -> Result<DbRow, BenchError> {
        self.query(sql, params)
            .await?
            .into_iter()
            .next()
            .ok_or(BenchError::NoRows)
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, BenchError>;

    /// Send every queued statement in one round trip; returns per-statement counts.
    async fn send_batch(&self, batch: &Batch) -> Result<Vec<u64>, BenchError>;

    /// Bulk load `rows` into `table` with binary COPY; returns the number of rows copied.
    async fn copy_in(
        &self,
        table: &str,
        columns: &[&str],
        rows: CopyRows<'_>,
    ) -> Result<u64, BenchError>;

    /// Release the underlying connection(s).
    async fn close(&self);
}

#[async_trait]
impl<T: Database + ?Sized> Database for Box<T> {
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError> {
        (**self).execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[RowValue]) -> Result<Vec<DbRow>, BenchError> {
        (**self).query(sql, params).await
    }

    async fn query_stream<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [RowValue],
    ) -> Result<DbRowStream<'a>, BenchError> {
        (**self).query_stream(sql, params).await
    }

    async fn query_one(&self, sql: &str, params: &[RowValue]) -> Result<DbRow, BenchError> {
        (**self).query_one(sql, params).await
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, BenchError> {
        (**self).begin().await
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Vec<u64>, BenchError> {
        (**self).send_batch(batch).await
    }

    async fn copy_in(
        &self,
        table: &str,
        columns: &[&str],
        rows: CopyRows<'_>,
    ) -> Result<u64, BenchError> {
        (**self).copy_in(table, columns, rows).await
    }

    async fn close(&self) {
        (**self).close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_keeps_queue_order() {
        let mut batch = Batch::with_capacity(2);
        batch.queue("INSERT INTO a VALUES ($1)", vec![RowValue::Int(1)]);
        batch.queue("INSERT INTO b VALUES ($1)", vec![RowValue::Int(2)]);
        assert_eq!(batch.len(), 2);
        let queries: Vec<&str> = batch.iter().map(|q| q.query.as_str()).collect();
        assert_eq!(queries, ["INSERT INTO a VALUES ($1)", "INSERT INTO b VALUES ($1)"]);
        assert!(Batch::new().is_empty());
    }

    #[test]
    fn copy_from_fn_yields_each_index() {
        let rows: Vec<_> = copy_from_fn(3, |i| Ok(vec![RowValue::Int(i as i64)]))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![RowValue::Int(0)],
                vec![RowValue::Int(1)],
                vec![RowValue::Int(2)]
            ]
        );
    }

    #[test]
    fn copy_from_fn_surfaces_row_errors() {
        let mut rows = copy_from_fn(2, |i| {
            if i == 1 {
                Err(BenchError::Other("bad row".into()))
            } else {
                Ok(vec![RowValue::Null])
            }
        });
        assert!(rows.next().unwrap().is_ok());
        assert!(rows.next().unwrap().is_err());
        assert!(rows.next().is_none());
    }
}
