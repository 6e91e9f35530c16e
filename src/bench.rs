use std::hint::black_box;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::database::{Batch, Database, copy_from_fn};
use crate::error::{BenchError, BenchFailure};
use crate::model::{COLUMNS, DbUser, INSERT_SQL, SELECT_SQL, TABLE_NAME};
use crate::types::RowValue;

/// Sizes shared by every benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BenchSettings {
    /// Rows inserted by each write benchmark and fetched by each read benchmark
    pub rows: usize,
    /// Statements per batch for [`insert_batch`]
    pub batch_size: usize,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            rows: 1000,
            batch_size: 100,
        }
    }
}

/// Variants are declared, and therefore ordered, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Benchmark {
    InsertSimple,
    InsertBatch,
    InsertCopy,
    SelectScan,
    SelectCollect,
}

impl Benchmark {
    /// Every benchmark, in the order they run.
    pub const ALL: [Benchmark; 5] = [
        Benchmark::InsertSimple,
        Benchmark::InsertBatch,
        Benchmark::InsertCopy,
        Benchmark::SelectScan,
        Benchmark::SelectCollect,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Benchmark::InsertSimple => "Insert row by row",
            Benchmark::InsertBatch => "Insert in batch",
            Benchmark::InsertCopy => "Insert using copy",
            Benchmark::SelectScan => "Select, then Scan()",
            Benchmark::SelectCollect => "Select, then CollectRows()",
        }
    }

    /// # Errors
    /// Returns the first error the benchmark hits.
    pub async fn run(self, db: &dyn Database, settings: &BenchSettings) -> Result<(), BenchError> {
        match self {
            Benchmark::InsertSimple => insert_simple(db, settings).await,
            Benchmark::InsertBatch => insert_batch(db, settings).await,
            Benchmark::InsertCopy => insert_copy(db, settings).await,
            Benchmark::SelectScan => fetch_select_scan(db, settings).await,
            Benchmark::SelectCollect => fetch_select_collect(db, settings).await,
        }
    }
}

/// Insert the fixture user `rows` times, one statement per round trip.
///
/// # Errors
/// Stops at the first failed insert.
pub async fn insert_simple(db: &dyn Database, settings: &BenchSettings) -> Result<(), BenchError> {
    let params = DbUser::fixture().params();
    for _ in 0..settings.rows {
        db.execute(INSERT_SQL, &params).await?;
    }
    Ok(())
}

/// Insert the fixture user `rows` times in batches of `batch_size`. The last batch
/// only carries the remaining rows.
///
/// # Errors
/// Returns `BenchError::ConfigError` for a zero batch size, otherwise the first
/// failed batch.
pub async fn insert_batch(db: &dyn Database, settings: &BenchSettings) -> Result<(), BenchError> {
    if settings.batch_size == 0 {
        return Err(BenchError::ConfigError(
            "batch size must be at least 1".to_string(),
        ));
    }

    let params = DbUser::fixture().params();
    let mut sent = 0;
    while sent < settings.rows {
        let size = settings.batch_size.min(settings.rows - sent);
        let mut batch = Batch::with_capacity(size);
        for _ in 0..size {
            batch.queue(INSERT_SQL, params.clone());
        }
        db.send_batch(&batch).await?;
        sent += size;
    }
    Ok(())
}

/// Load `rows` copies of the fixture user with one binary COPY.
///
/// # Errors
/// Returns the COPY error.
pub async fn insert_copy(db: &dyn Database, settings: &BenchSettings) -> Result<(), BenchError> {
    let user = DbUser::fixture();
    let rows = copy_from_fn(settings.rows, move |_| Ok(user.params()));
    let copied = db.copy_in(TABLE_NAME, &COLUMNS, rows).await?;
    debug!("copied {copied} rows");
    Ok(())
}

/// Fetch up to `rows` rows and scan each one as it arrives.
///
/// # Errors
/// Returns the query error or the first row that fails to read or scan.
pub async fn fetch_select_scan(
    db: &dyn Database,
    settings: &BenchSettings,
) -> Result<(), BenchError> {
    let limit = [limit_param(settings)?];
    let mut rows = db.query_stream(SELECT_SQL, &limit).await?;
    let mut scanned = 0usize;
    while let Some(row) = rows.next().await {
        let user = DbUser::from_row(&row?)?;
        black_box(&user);
        scanned += 1;
    }
    debug!("scanned {scanned} rows");
    Ok(())
}

/// Fetch up to `rows` rows, buffer them all, then collect them into users.
///
/// # Errors
/// Returns the query error or the first row that fails to read or scan.
pub async fn fetch_select_collect(
    db: &dyn Database,
    settings: &BenchSettings,
) -> Result<(), BenchError> {
    let limit = [limit_param(settings)?];
    let rows = db.query(SELECT_SQL, &limit).await?;
    let users = rows
        .iter()
        .map(DbUser::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    debug!("collected {} rows", users.len());
    black_box(users);
    Ok(())
}

fn limit_param(settings: &BenchSettings) -> Result<RowValue, BenchError> {
    i64::try_from(settings.rows)
        .map(RowValue::Int)
        .map_err(|e| BenchError::ConfigError(format!("row count out of range: {e}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchTiming {
    pub benchmark: Benchmark,
    pub elapsed: Duration,
}

/// Timings of every benchmark that ran, in run order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BenchReport {
    pub timings: Vec<BenchTiming>,
}

impl BenchReport {
    #[must_use]
    pub fn total(&self) -> Duration {
        self.timings.iter().map(|t| t.elapsed).sum()
    }

    #[must_use]
    pub fn get(&self, benchmark: Benchmark) -> Option<Duration> {
        self.timings
            .iter()
            .find(|t| t.benchmark == benchmark)
            .map(|t| t.elapsed)
    }
}

/// Run the selected benchmarks in [`Benchmark::ALL`] order, timing and logging each.
/// An empty selection runs all of them. A failing benchmark is logged and the rest
/// still run.
///
/// # Errors
/// `BenchError::Benchmarks` carrying every failure, if any benchmark failed.
pub async fn run_benchmarks(
    db: &dyn Database,
    settings: &BenchSettings,
    selection: &[Benchmark],
) -> Result<BenchReport, BenchError> {
    let mut report = BenchReport::default();
    let mut failures = Vec::new();

    let selected = Benchmark::ALL
        .into_iter()
        .filter(|b| selection.is_empty() || selection.contains(b));
    for benchmark in selected {
        let name = benchmark.name();
        info!("Starting {name}");
        let started = Instant::now();
        let outcome = benchmark.run(db, settings).await;
        let elapsed = started.elapsed();
        match outcome {
            Ok(()) => {
                info!("Finished {name} in {}ms", elapsed.as_millis());
                report.timings.push(BenchTiming { benchmark, elapsed });
            }
            Err(error) => {
                error!("Error running \"{name}\": {error}");
                failures.push(BenchFailure { name, error });
            }
        }
    }

    if failures.is_empty() {
        Ok(report)
    } else {
        Err(BenchError::Benchmarks(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        let names: Vec<_> = Benchmark::ALL.iter().map(|b| b.name()).collect();
        assert_eq!(
            names,
            [
                "Insert row by row",
                "Insert in batch",
                "Insert using copy",
                "Select, then Scan()",
                "Select, then CollectRows()",
            ]
        );
    }

    #[test]
    fn cli_names_are_kebab_case() {
        let parsed = Benchmark::from_str("select-scan", false).unwrap();
        assert_eq!(parsed, Benchmark::SelectScan);
        assert_eq!(
            serde_json::to_string(&Benchmark::InsertCopy).unwrap(),
            "\"insert-copy\""
        );
    }

    #[test]
    fn ordering_follows_run_order() {
        let mut sorted = Benchmark::ALL;
        sorted.reverse();
        sorted.sort();
        assert_eq!(sorted, Benchmark::ALL);
    }

    #[test]
    fn report_totals_and_lookups() {
        let report = BenchReport {
            timings: vec![
                BenchTiming {
                    benchmark: Benchmark::InsertSimple,
                    elapsed: Duration::from_millis(30),
                },
                BenchTiming {
                    benchmark: Benchmark::InsertCopy,
                    elapsed: Duration::from_millis(5),
                },
            ],
        };
        assert_eq!(report.total(), Duration::from_millis(35));
        assert_eq!(
            report.get(Benchmark::InsertCopy),
            Some(Duration::from_millis(5))
        );
        assert_eq!(report.get(Benchmark::SelectScan), None);
    }

    #[test]
    fn limit_uses_row_count() {
        let settings = BenchSettings {
            rows: 7,
            batch_size: 1,
        };
        assert_eq!(limit_param(&settings).unwrap(), RowValue::Int(7));
    }
}
