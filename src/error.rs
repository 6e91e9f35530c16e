use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// A single benchmark that did not complete.
#[derive(Debug)]
pub struct BenchFailure {
    pub name: &'static str,
    pub error: BenchError,
}

impl fmt::Display for BenchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\": {}", self.name, self.error)
    }
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Postgres error: {}", with_causes(.0))]
    PostgresError(#[from] tokio_postgres::Error),

    #[error("Pool error: {}", with_causes(.0))]
    PoolError(#[from] deadpool_postgres::PoolError),

    #[error("Failed to create Postgres pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error("Query returned no rows")]
    NoRows,

    #[error("Parameter encoding error: {0}")]
    EncodeError(String),

    #[error("Mock expectation error: {0}")]
    MockError(String),

    #[error("{} benchmark(s) failed: {}", .0.len(), join_failures(.0))]
    Benchmarks(Vec<BenchFailure>),

    #[error("Other error: {0}")]
    Other(String),
}

/// Display an error followed by every cause it wraps. The driver prints only `db error`
/// at the top level; the server's message is in the source chain.
fn with_causes(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn join_failures(failures: &[BenchFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BenchError {
    /// Failures carried by a joined runner error; empty for every other variant.
    #[must_use]
    pub fn failures(&self) -> &[BenchFailure] {
        match self {
            BenchError::Benchmarks(failures) => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_error_lists_each_failure() {
        let err = BenchError::Benchmarks(vec![
            BenchFailure {
                name: "Insert row by row",
                error: BenchError::Other("boom".to_string()),
            },
            BenchFailure {
                name: "Insert using copy",
                error: BenchError::NoRows,
            },
        ]);
        assert_eq!(
            err.to_string(),
            "2 benchmark(s) failed: \"Insert row by row\": Other error: boom; \
             \"Insert using copy\": Query returned no rows"
        );
        assert_eq!(err.failures().len(), 2);
        assert!(BenchError::NoRows.failures().is_empty());
    }

    #[derive(Debug)]
    struct Layer {
        text: &'static str,
        cause: Option<Box<Layer>>,
    }

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.text)
        }
    }

    impl StdError for Layer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.cause.as_deref().map(|c| c as &(dyn StdError + 'static))
        }
    }

    #[test]
    fn causes_are_appended_once() {
        let err = Layer {
            text: "db error",
            cause: Some(Box::new(Layer {
                text: "ERROR: division by zero",
                cause: None,
            })),
        };
        assert_eq!(with_causes(&err), "db error: ERROR: division by zero");

        let repeated = Layer {
            text: "db error: ERROR: relation \"nope\" does not exist",
            cause: Some(Box::new(Layer {
                text: "ERROR: relation \"nope\" does not exist",
                cause: None,
            })),
        };
        assert_eq!(
            with_causes(&repeated),
            "db error: ERROR: relation \"nope\" does not exist"
        );
    }
}
