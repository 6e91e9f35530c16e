mod args;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use pg_access_bench::{
    BenchError, BenchReport, Database, close_db, connect_to_db, init_db, run_benchmarks,
};
use tracing::{Level, error, info};

use crate::args::{Args, BenchConfig};
use crate::logging::log_writer;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = BenchConfig::from_args(args);
    let writer = log_writer(config.log.as_deref()).unwrap_or_else(|err| {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_target(false)
        .with_max_level(if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let config_json = serde_json::to_string(&config).unwrap_or_else(|_| "{}".to_string());
    info!("config: {config_json}");

    let db = match connect_to_db(&config.connect_options()).await {
        Ok(db) => db,
        Err(err) => {
            error!("Unable to connect to database: {err}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(db.as_ref(), &config).await;
    // close_db logs its own failure; the run outcome decides the exit code
    let _ = close_db(db.as_ref()).await;

    match outcome {
        Ok(report) => {
            info!(
                "Finished {} benchmark(s) in {}ms",
                report.timings.len(),
                report.total().as_millis()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(db: &dyn Database, config: &BenchConfig) -> Result<BenchReport, BenchError> {
    if let Err(err) = init_db(db).await {
        error!("Unable to initialise test schema: {err}");
        return Err(err);
    }
    run_benchmarks(db, &config.settings(), &config.benchmarks)
        .await
        .inspect_err(|err| error!("Failed to execute all benchmarks: {err}"))
}
