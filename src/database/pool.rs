use async_trait::async_trait;
use deadpool_postgres::{Config as PgConfig, Pool, PoolConfig, Runtime};
use tokio_postgres::NoTls;
use tracing::debug;

use super::session::{self, PgTransaction};
use super::{Batch, CopyRows, Database, DbRowStream, Transaction};
use crate::error::BenchError;
use crate::types::{DbRow, RowValue};

/// A [`Database`] backed by a deadpool connection pool. Each call checks a
/// connection out for its own duration.
#[derive(Clone)]
pub struct PgPool {
    pool: Pool,
}

impl std::fmt::Debug for PgPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPool")
            .field("status", &self.inner().status())
            .finish()
    }
}

impl PgPool {
    /// Build a pool from a connection string. No connection is opened until first use.
    ///
    /// # Errors
    /// Returns `BenchError::ConfigError` for an empty string or a zero pool size, and
    /// `BenchError::CreatePool` if the string cannot be parsed.
    pub fn new(conn_str: &str, max_size: usize) -> Result<Self, BenchError> {
        if conn_str.trim().is_empty() {
            return Err(BenchError::ConfigError(
                "connection string is required".to_string(),
            ));
        }
        if max_size == 0 {
            return Err(BenchError::ConfigError(
                "pool size must be at least 1".to_string(),
            ));
        }

        let mut cfg = PgConfig::new();
        cfg.url = Some(conn_str.to_string());
        cfg.pool = Some(PoolConfig::new(max_size));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
        debug!("created postgres pool with max size {max_size}");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn inner(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgPool {
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError> {
        let client = self.pool.get().await?;
        session::execute(&client, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[RowValue]) -> Result<Vec<DbRow>, BenchError> {
        let client = self.pool.get().await?;
        session::query(&client, sql, params).await
    }

    async fn query_stream<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [RowValue],
    ) -> Result<DbRowStream<'a>, BenchError> {
        let client = self.pool.get().await?;
        let stream = session::query_raw(&client, sql, params).await?;
        Ok(session::decode_stream(stream, client))
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, BenchError> {
        let client = self.pool.get().await?;
        Ok(Box::new(PgTransaction::begin_pooled(client).await?))
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Vec<u64>, BenchError> {
        let client = self.pool.get().await?;
        session::send_batch(&client, batch).await
    }

    async fn copy_in(
        &self,
        table: &str,
        columns: &[&str],
        rows: CopyRows<'_>,
    ) -> Result<u64, BenchError> {
        let client = self.pool.get().await?;
        session::copy_in(&client, table, columns, rows).await
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_connection_string() {
        assert!(matches!(
            PgPool::new("  ", 4),
            Err(BenchError::ConfigError(_))
        ));
    }

    #[test]
    fn rejects_zero_pool_size() {
        assert!(matches!(
            PgPool::new("postgresql://localhost/test", 0),
            Err(BenchError::ConfigError(_))
        ));
    }

    #[test]
    fn rejects_malformed_connection_string() {
        assert!(matches!(
            PgPool::new("mailformed connection string", 4),
            Err(BenchError::CreatePool(_))
        ));
    }

    #[tokio::test]
    async fn builds_lazily_without_a_server() {
        let pool = PgPool::new("postgresql://bench@127.0.0.1:1/test", 2).unwrap();
        assert_eq!(pool.inner().status().max_size, 2);
        pool.close().await;
        assert!(pool.inner().is_closed());
    }
}
