use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use deadpool_postgres::Object;
use futures_util::StreamExt;
use futures_util::future::try_join_all;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Statement};
use tracing::{debug, warn};

use super::{Batch, CopyRows, DbRowStream, Transaction};
use crate::error::BenchError;
use crate::types::{DbRow, RowValue, as_sql_params, column_names, decode_row};

pub(super) async fn execute(
    client: &Client,
    sql: &str,
    params: &[RowValue],
) -> Result<u64, BenchError> {
    Ok(client.execute(sql, &as_sql_params(params)).await?)
}

pub(super) async fn query(
    client: &Client,
    sql: &str,
    params: &[RowValue],
) -> Result<Vec<DbRow>, BenchError> {
    let rows = client.query(sql, &as_sql_params(params)).await?;
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let names = column_names(first);
    rows.iter()
        .map(|row| decode_row(row, Arc::clone(&names)))
        .collect()
}

pub(super) async fn query_raw(
    client: &Client,
    sql: &str,
    params: &[RowValue],
) -> Result<tokio_postgres::RowStream, BenchError> {
    let params = params.iter().map(|p| p as &(dyn ToSql + Sync));
    Ok(client.query_raw(sql, params).await?)
}

/// Decode a driver row stream lazily. `hold` stays alive until the stream is dropped,
/// which keeps a pooled connection checked out while rows are still arriving.
pub(super) fn decode_stream<'a, H>(stream: tokio_postgres::RowStream, hold: H) -> DbRowStream<'a>
where
    H: Send + 'a,
{
    let mut names: Option<Arc<Vec<String>>> = None;
    stream
        .map(move |row| {
            let _hold = &hold;
            let row = row?;
            let names = names.get_or_insert_with(|| column_names(&row));
            decode_row(&row, Arc::clone(names))
        })
        .boxed()
}

pub(super) async fn send_batch(client: &Client, batch: &Batch) -> Result<Vec<u64>, BenchError> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    client.batch_execute("BEGIN").await?;
    match pipeline(client, batch).await {
        Ok(counts) => {
            client.batch_execute("COMMIT").await?;
            Ok(counts)
        }
        Err(err) => {
            if let Err(rollback_err) = client.batch_execute("ROLLBACK").await {
                warn!("rollback after failed batch also failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

async fn pipeline(client: &Client, batch: &Batch) -> Result<Vec<u64>, BenchError> {
    let mut statements: HashMap<&str, Statement> = HashMap::new();
    for queued in batch.iter() {
        if !statements.contains_key(queued.query.as_str()) {
            let stmt = client.prepare(&queued.query).await?;
            statements.insert(queued.query.as_str(), stmt);
        }
    }

    let params: Vec<Vec<&(dyn ToSql + Sync)>> =
        batch.iter().map(|q| as_sql_params(&q.params)).collect();

    // Futures polled together on one client share a single pipelined round trip.
    let pending = batch
        .iter()
        .zip(&params)
        .map(|(queued, params)| client.execute(&statements[queued.query.as_str()], params));
    let counts = try_join_all(pending).await?;
    debug!("batch of {} statements applied", counts.len());
    Ok(counts)
}

pub(super) async fn copy_in(
    client: &Client,
    table: &str,
    columns: &[&str],
    rows: CopyRows<'_>,
) -> Result<u64, BenchError> {
    let table = quote_ident(table);
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    // Binary COPY needs the exact column types; describe them from the table itself.
    let probe = client
        .prepare(&format!("SELECT {column_list} FROM {table} LIMIT 0"))
        .await?;
    let types: Vec<Type> = probe.columns().iter().map(|c| c.type_().clone()).collect();

    let sink = client
        .copy_in(&format!("COPY {table} ({column_list}) FROM STDIN BINARY"))
        .await?;
    let writer = BinaryCopyInWriter::new(sink, &types);
    futures_util::pin_mut!(writer);

    for row in rows {
        let row = row?;
        writer.as_mut().write(&as_sql_params(&row)).await?;
    }

    Ok(writer.finish().await?)
}

pub(super) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

enum TxConn<'a> {
    Pooled(Object),
    Direct {
        client: &'a Client,
        abandoned: &'a AtomicBool,
    },
}

impl TxConn<'_> {
    fn client(&self) -> &Client {
        match self {
            TxConn::Pooled(obj) => {
                let client: &Client = obj;
                client
            }
            TxConn::Direct { client, .. } => client,
        }
    }

    /// Keep a pooled connection whose transaction state is unknown out of the pool. A
    /// direct connection is flagged so its next call rolls the transaction back first.
    fn discard(self) {
        match self {
            TxConn::Pooled(obj) => drop(Object::take(obj)),
            TxConn::Direct { abandoned, .. } => {
                warn!("transaction on the direct connection was left open; rolling back on next use");
                abandoned.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Roll back a transaction abandoned on a direct connection before the next statement
/// runs on it.
pub(super) async fn settle(client: &Client, abandoned: &AtomicBool) -> Result<(), BenchError> {
    if abandoned.swap(false, Ordering::SeqCst) {
        if let Err(err) = client.batch_execute("ROLLBACK").await {
            abandoned.store(true, Ordering::SeqCst);
            return Err(err.into());
        }
        debug!("rolled back abandoned transaction");
    }
    Ok(())
}

/// A transaction driven with explicit `BEGIN`/`COMMIT`/`ROLLBACK` statements.
pub(super) struct PgTransaction<'a> {
    // `Some` for the whole life of the handle: `commit` and `rollback` consume the box,
    // and `Drop` takes it only to discard an unfinished transaction.
    conn: Option<TxConn<'a>>,
}

impl<'a> PgTransaction<'a> {
    pub(super) async fn begin_pooled(obj: Object) -> Result<Self, BenchError> {
        Self::begin(TxConn::Pooled(obj)).await
    }

    pub(super) async fn begin_direct(
        client: &'a Client,
        abandoned: &'a AtomicBool,
    ) -> Result<Self, BenchError> {
        settle(client, abandoned).await?;
        Self::begin(TxConn::Direct { client, abandoned }).await
    }

    async fn begin(conn: TxConn<'a>) -> Result<Self, BenchError> {
        let started = conn.client().batch_execute("BEGIN").await;
        if let Err(err) = started {
            conn.discard();
            return Err(err.into());
        }
        Ok(Self { conn: Some(conn) })
    }

    fn client(&self) -> Result<&Client, BenchError> {
        self.conn
            .as_ref()
            .map(TxConn::client)
            .ok_or_else(finished)
    }

    async fn finish(&mut self, sql: &str) -> Result<(), BenchError> {
        let conn = self
            .conn
            .take()
            .ok_or_else(finished)?;
        let finished = conn.client().batch_execute(sql).await;
        if let Err(err) = finished {
            conn.discard();
            return Err(err.into());
        }
        Ok(())
    }
}

fn finished() -> BenchError {
    BenchError::Other("transaction already finished".to_string())
}

impl Drop for PgTransaction<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.discard();
        }
    }
}

#[async_trait::async_trait]
impl<'a> Transaction for PgTransaction<'a> {
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<u64, BenchError> {
        execute(self.client()?, sql, params).await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), BenchError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), BenchError> {
        self.finish("ROLLBACK").await
    }
}
