use std::future::Future;

use clap::ValueEnum;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::{Database, PgClient, PgPool};
use crate::error::BenchError;
use crate::model::{CREATE_TABLE_SQL, DROP_TABLE_SQL, PROBE_INSERT_SQL, VERSION_SQL};
use crate::types::RowValue;

/// Which driver connection type the benchmarks run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// `deadpool-postgres` pool; every call checks a connection out
    Pool,
    /// One `tokio-postgres` connection shared by every call
    Client,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub conn_str: String,
    pub driver: Driver,
    pub pool_size: usize,
}

/// Open the configured driver and check the server answers.
///
/// # Errors
/// Returns configuration, connection and query errors from the driver.
pub async fn connect_to_db(options: &ConnectOptions) -> Result<Box<dyn Database>, BenchError> {
    let driver = options.driver;
    let pool_size = options.pool_size;
    connect_with(&options.conn_str, move |conn_str| async move {
        let db: Box<dyn Database> = match driver {
            Driver::Pool => Box::new(PgPool::new(&conn_str, pool_size)?),
            Driver::Client => Box::new(PgClient::connect(&conn_str).await?),
        };
        Ok::<_, BenchError>(db)
    })
    .await
}

/// Open a connection with `connect`, then run `SELECT version()` to prove it works.
/// A connection that fails the check is closed before the error is returned.
///
/// # Errors
/// Propagates the error from `connect` or from the version query.
pub async fn connect_with<D, F, Fut>(conn_str: &str, connect: F) -> Result<D, BenchError>
where
    D: Database,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<D, BenchError>>,
{
    let db = connect(conn_str.to_string()).await?;
    let row = match db.query_one(VERSION_SQL, &[]).await {
        Ok(row) => row,
        Err(err) => {
            db.close().await;
            return Err(err);
        }
    };
    let version = row
        .get_by_index(0)
        .and_then(RowValue::as_text)
        .unwrap_or("an unknown version");
    info!("Connected to database on {version}");
    Ok(db)
}

/// Create the benchmark table and check a row can be written to it. The probe row is
/// always rolled back.
///
/// # Errors
/// Returns the first failure among create, begin, probe insert and rollback.
pub async fn init_db(db: &dyn Database) -> Result<(), BenchError> {
    db.execute(CREATE_TABLE_SQL, &[]).await?;

    let tx = db.begin().await?;
    let probe = tx.execute(PROBE_INSERT_SQL, &[]).await;
    let rolled_back = tx.rollback().await;
    probe?;
    rolled_back?;

    debug!("benchmark schema ready");
    Ok(())
}

/// Drop the benchmark table and close the connection, even if the drop fails.
///
/// # Errors
/// Returns the error from `DROP TABLE`.
pub async fn close_db(db: &dyn Database) -> Result<(), BenchError> {
    let dropped = db.execute(DROP_TABLE_SQL, &[]).await;
    db.close().await;
    match dropped {
        Ok(_) => Ok(()),
        Err(err) => {
            warn!("dropping the benchmark table failed: {err}");
            Err(err)
        }
    }
}
