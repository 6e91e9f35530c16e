use serde_json::{Value as JsonValue, json};

use crate::error::BenchError;
use crate::types::{DbRow, RowValue};

/// Table every benchmark writes to and reads from.
pub const TABLE_NAME: &str = "test";

/// Columns in insert/copy/select order.
pub const COLUMNS: [&str; 4] = ["id", "name", "age", "meta"];

pub const CREATE_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS test (id bigint, name text, age int, meta jsonb)";

pub const DROP_TABLE_SQL: &str = "DROP TABLE test";

/// Literal row used to check the schema accepts writes; always rolled back.
pub const PROBE_INSERT_SQL: &str =
    r#"INSERT INTO test (id, name, age, meta) VALUES (1, 'John', 25, '{"role": "developer"}')"#;

pub const INSERT_SQL: &str = "INSERT INTO test (id, name, age, meta) VALUES ($1, $2, $3, $4)";

pub const SELECT_SQL: &str = "SELECT id, name, age, meta FROM test LIMIT $1";

pub const VERSION_SQL: &str = "SELECT version()";

/// One row of the benchmark table.
#[derive(Debug, Clone, PartialEq)]
pub struct DbUser {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub meta: JsonValue,
}

impl DbUser {
    /// The user every write benchmark inserts.
    #[must_use]
    pub fn fixture() -> Self {
        Self {
            id: 1,
            name: "John".to_string(),
            age: 42,
            meta: json!({"role": "developer"}),
        }
    }

    /// Bind values in [`COLUMNS`] order.
    #[must_use]
    pub fn params(&self) -> Vec<RowValue> {
        vec![
            RowValue::Int(self.id),
            RowValue::Text(self.name.clone()),
            RowValue::from(self.age),
            RowValue::Json(self.meta.clone()),
        ]
    }

    /// Scan a decoded `id, name, age, meta` row.
    ///
    /// # Errors
    /// Returns `BenchError::ScanError` if the row is short, a column is NULL, or a
    /// value has the wrong type.
    pub fn from_row(row: &DbRow) -> Result<Self, BenchError> {
        if row.len() < COLUMNS.len() {
            return Err(BenchError::ScanError(format!(
                "expected {} columns, got {}",
                COLUMNS.len(),
                row.len()
            )));
        }

        let id = row.values[0]
            .as_int()
            .ok_or_else(|| mismatch("id", "integer", &row.values[0]))?;
        let name = row.values[1]
            .as_text()
            .ok_or_else(|| mismatch("name", "text", &row.values[1]))?
            .to_string();
        let age = row.values[2]
            .as_int()
            .ok_or_else(|| mismatch("age", "integer", &row.values[2]))?;
        let age = i32::try_from(age)
            .map_err(|e| BenchError::ScanError(format!("age out of range: {e}")))?;
        let meta = match (row.values[3].as_json(), row.values[3].as_text()) {
            (Some(value), _) => value.clone(),
            // json arriving as text, e.g. from a driver without json decoding
            (None, Some(raw)) => serde_json::from_str(raw)
                .map_err(|e| BenchError::ScanError(format!("meta is not valid json: {e}")))?,
            (None, None) => return Err(mismatch("meta", "json", &row.values[3])),
        };

        Ok(Self {
            id,
            name,
            age,
            meta,
        })
    }
}

fn mismatch(column: &str, expected: &str, got: &RowValue) -> BenchError {
    if got.is_null() {
        return BenchError::ScanError(format!("column {column}: unexpected NULL"));
    }
    BenchError::ScanError(format!("column {column}: expected {expected}, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn columns() -> Arc<Vec<String>> {
        Arc::new(COLUMNS.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn fixture_params_follow_column_order() {
        let params = DbUser::fixture().params();
        assert_eq!(
            params,
            vec![
                RowValue::Int(1),
                RowValue::Text("John".into()),
                RowValue::Int(42),
                RowValue::Json(json!({"role": "developer"})),
            ]
        );
    }

    #[test]
    fn scans_a_full_row() {
        let row = DbRow::new(columns(), DbUser::fixture().params());
        assert_eq!(DbUser::from_row(&row).unwrap(), DbUser::fixture());
    }

    #[test]
    fn scans_json_sent_as_text() {
        let row = DbRow::new(
            columns(),
            vec![
                RowValue::Int(2),
                "Jane".into(),
                RowValue::Int(24),
                r#"{"role": "manager"}"#.into(),
            ],
        );
        let user = DbUser::from_row(&row).unwrap();
        assert_eq!(user.meta, json!({"role": "manager"}));
    }

    #[test]
    fn rejects_short_or_null_rows() {
        let short = DbRow::new(columns(), vec![RowValue::Int(1)]);
        assert!(matches!(
            DbUser::from_row(&short),
            Err(BenchError::ScanError(_))
        ));

        let mut values = DbUser::fixture().params();
        values[1] = RowValue::Null;
        let null_name = DbRow::new(columns(), values);
        match DbUser::from_row(&null_name) {
            Err(BenchError::ScanError(message)) => assert!(message.contains("unexpected NULL")),
            other => panic!("expected a scan error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_meta_of_the_wrong_type() {
        let mut values = DbUser::fixture().params();
        values[3] = RowValue::Int(7);
        let row = DbRow::new(columns(), values);
        match DbUser::from_row(&row) {
            Err(BenchError::ScanError(message)) => assert!(message.contains("expected json")),
            other => panic!("expected a scan error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_age_out_of_range() {
        let mut values = DbUser::fixture().params();
        values[2] = RowValue::Int(i64::MAX);
        let row = DbRow::new(columns(), values);
        assert!(DbUser::from_row(&row).is_err());
    }
}
