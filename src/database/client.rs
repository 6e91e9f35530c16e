use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use super::session::{self, PgTransaction};
use super::{Batch, CopyRows, Database, DbRowStream, Transaction};
use crate::error::BenchError;
use crate::types::{DbRow, RowValue};

/// A [`Database`] over one `tokio-postgres` connection. The connection future runs
/// on its own task for as long as this value lives.
///
/// A transaction dropped without `commit` or `rollback` is rolled back before the
/// next call runs, so later statements are not swallowed by it.
pub struct PgClient {
    client: Client,
    connection: JoinHandle<()>,
    abandoned_tx: AtomicBool,
}

impl PgClient {
    /// Open a single connection.
    ///
    /// # Errors
    /// Returns `BenchError::ConfigError` for an empty string and the driver error if
    /// the string is malformed or the server cannot be reached.
    pub async fn connect(conn_str: &str) -> Result<Self, BenchError> {
        if conn_str.trim().is_empty() {
            return Err(BenchError::ConfigError(
                "connection string is required".to_string(),
            ));
        }

        let (client, connection) = tokio_postgres::connect(conn_str, NoTls).await?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {e}");
            }
        });
        debug!("opened direct postgres connection");
        Ok(Self {
            client,
            connection,
            abandoned_tx: AtomicBool::new(false),
        })
    }

    async fn settle(&self) -> Result<&Client, BenchError> {
        session::settle(&self.client, &self.abandoned_tx).await?;
        Ok(&self.client)
    }
}

impl Drop for PgClient {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

#[async_trait]
impl Database for PgClient {
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError> {
        session::execute(self.settle().await?, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[RowValue]) -> Result<Vec<DbRow>, BenchError> {
        session::query(self.settle().await?, sql, params).await
    }

    async fn query_stream<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [RowValue],
    ) -> Result<DbRowStream<'a>, BenchError> {
        let stream = session::query_raw(self.settle().await?, sql, params).await?;
        Ok(session::decode_stream(stream, ()))
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, BenchError> {
        Ok(Box::new(
            PgTransaction::begin_direct(&self.client, &self.abandoned_tx).await?,
        ))
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Vec<u64>, BenchError> {
        session::send_batch(self.settle().await?, batch).await
    }

    async fn copy_in(
        &self,
        table: &str,
        columns: &[&str],
        rows: CopyRows<'_>,
    ) -> Result<u64, BenchError> {
        session::copy_in(self.settle().await?, table, columns, rows).await
    }

    async fn close(&self) {
        self.connection.abort();
    }
}
