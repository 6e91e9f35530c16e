//! Micro-benchmarks for PostgreSQL write and read access patterns.
//!
//! Five patterns are timed against a live server through the [`Database`] trait:
//! row-by-row insert, batched insert, binary COPY, query-then-scan and
//! query-then-collect. [`PgPool`] and [`PgClient`] implement the trait over
//! `deadpool-postgres` and `tokio-postgres`.

pub mod bench;
pub mod database;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod model;
pub mod setup;
#[cfg(feature = "test-utils-postgres")]
pub mod test_utils;
pub mod types;

pub use bench::{
    BenchReport, BenchSettings, BenchTiming, Benchmark, fetch_select_collect, fetch_select_scan,
    insert_batch, insert_copy, insert_simple, run_benchmarks,
};
pub use database::{
    Batch, CopyRows, Database, DbRowStream, PgClient, PgPool, QueryAndParams, Transaction,
    copy_from_fn,
};
pub use error::{BenchError, BenchFailure};
pub use model::DbUser;
pub use setup::{ConnectOptions, Driver, close_db, connect_to_db, connect_with, init_db};
pub use types::{DbRow, RowValue};
