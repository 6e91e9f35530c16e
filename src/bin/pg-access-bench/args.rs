use std::path::PathBuf;

use clap::Parser;
use pg_access_bench::{BenchSettings, Benchmark, ConnectOptions, Driver};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Compare PostgreSQL insert and fetch access patterns"
)]
pub(crate) struct Args {
    /// Connection string to the PostgreSQL database
    #[arg(short = 'c', long = "conn", env = "DATABASE_URL")]
    pub(crate) conn: String,
    /// Number of rows to insert, and to fetch back
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub(crate) rows: usize,
    /// Batch size for batch insert
    #[arg(short = 'b', long, default_value_t = 100, value_parser = parse_positive)]
    pub(crate) batch_size: usize,
    #[arg(long, value_enum, default_value = "pool")]
    pub(crate) driver: Driver,
    #[arg(long, default_value_t = 4, value_parser = parse_positive)]
    pub(crate) pool_size: usize,
    /// Run only these benchmarks (repeatable); all of them by default
    #[arg(long = "bench", value_enum)]
    pub(crate) benchmarks: Vec<Benchmark>,
    /// Also write log output to this file
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(short, long)]
    pub(crate) verbose: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BenchConfig {
    #[serde(skip)]
    pub(crate) conn_str: String,
    pub(crate) rows: usize,
    pub(crate) batch_size: usize,
    pub(crate) driver: Driver,
    pub(crate) pool_size: usize,
    pub(crate) benchmarks: Vec<Benchmark>,
    pub(crate) log: Option<PathBuf>,
    pub(crate) verbose: bool,
}

impl BenchConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut benchmarks = args.benchmarks;
        if benchmarks.is_empty() {
            benchmarks = Benchmark::ALL.to_vec();
        }
        benchmarks.sort_unstable();
        benchmarks.dedup();

        BenchConfig {
            conn_str: args.conn,
            rows: args.rows,
            batch_size: args.batch_size,
            driver: args.driver,
            pool_size: args.pool_size,
            benchmarks,
            log: args.log,
            verbose: args.verbose,
        }
    }

    pub(crate) fn settings(&self) -> BenchSettings {
        BenchSettings {
            rows: self.rows,
            batch_size: self.batch_size,
        }
    }

    pub(crate) fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            conn_str: self.conn_str.clone(),
            driver: self.driver,
            pool_size: self.pool_size,
        }
    }
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
