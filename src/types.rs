use std::error::Error;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use crate::error::BenchError;

/// Values bound as query parameters or decoded from result columns.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    /// Integer value (64-bit), narrowed on encode for `int2`/`int4` columns
    Int(i64),
    /// Text/string value
    Text(String),
    /// JSON value
    Json(JsonValue),
    /// NULL value
    Null,
}

impl RowValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let RowValue::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&JsonValue> {
        if let RowValue::Json(value) = self {
            Some(value)
        } else {
            None
        }
    }
}

impl From<i64> for RowValue {
    fn from(value: i64) -> Self {
        RowValue::Int(value)
    }
}

impl From<i32> for RowValue {
    fn from(value: i32) -> Self {
        RowValue::Int(i64::from(value))
    }
}

impl From<&str> for RowValue {
    fn from(value: &str) -> Self {
        RowValue::Text(value.to_string())
    }
}

impl From<String> for RowValue {
    fn from(value: String) -> Self {
        RowValue::Text(value)
    }
}

impl From<JsonValue> for RowValue {
    fn from(value: JsonValue) -> Self {
        RowValue::Json(value)
    }
}

impl ToSql for RowValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            RowValue::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                _ => Err(format!("cannot encode integer as {ty}").into()),
            },
            RowValue::Text(s) if <String as ToSql>::accepts(ty) => s.to_sql(ty, out),
            RowValue::Text(_) => Err(format!("cannot encode text as {ty}").into()),
            RowValue::Json(v) if <JsonValue as ToSql>::accepts(ty) => v.to_sql(ty, out),
            RowValue::Json(_) => Err(format!("cannot encode json as {ty}").into()),
            RowValue::Null => Ok(IsNull::Yes),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::JSON
                | Type::JSONB
        )
    }

    to_sql_checked!();
}

/// Borrow a slice of values in the form `tokio_postgres` expects for bind parameters.
#[must_use]
pub fn as_sql_params(params: &[RowValue]) -> Vec<&(dyn ToSql + Sync)> {
    let mut references = Vec::with_capacity(params.len());
    for p in params {
        references.push(p as &(dyn ToSql + Sync));
    }
    references
}

/// A decoded result row: shared column names plus the values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRow {
    pub column_names: Arc<Vec<String>>,
    pub values: Vec<RowValue>,
}

impl DbRow {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValue>) -> Self {
        Self {
            column_names,
            values,
        }
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValue> {
        self.values.get(index)
    }

    /// Look a value up by column name.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValue> {
        let index = self
            .column_names
            .iter()
            .position(|name| name == column_name)?;
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Column names of a driver row, shared by every row decoded from the same result.
#[must_use]
pub fn column_names(row: &tokio_postgres::Row) -> Arc<Vec<String>> {
    Arc::new(
        row.columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect(),
    )
}

/// Decode a driver row into a [`DbRow`].
///
/// # Errors
/// Returns the driver error when a column cannot be read as its declared type.
pub fn decode_row(
    row: &tokio_postgres::Row,
    column_names: Arc<Vec<String>>,
) -> Result<DbRow, BenchError> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        values.push(extract_value(row, idx)?);
    }
    Ok(DbRow::new(column_names, values))
}

fn extract_value(row: &tokio_postgres::Row, idx: usize) -> Result<RowValue, BenchError> {
    let type_info = row.columns()[idx].type_();

    match type_info.name() {
        "int2" => {
            let val: Option<i16> = row.try_get(idx)?;
            Ok(val.map_or(RowValue::Null, |v| RowValue::Int(i64::from(v))))
        }
        "int4" => {
            let val: Option<i32> = row.try_get(idx)?;
            Ok(val.map_or(RowValue::Null, |v| RowValue::Int(i64::from(v))))
        }
        "int8" => {
            let val: Option<i64> = row.try_get(idx)?;
            Ok(val.map_or(RowValue::Null, RowValue::Int))
        }
        "json" | "jsonb" => {
            let val: Option<JsonValue> = row.try_get(idx)?;
            Ok(val.map_or(RowValue::Null, RowValue::Json))
        }
        _ => {
            // text, varchar and anything else readable as a string
            let val: Option<String> = row.try_get(idx)?;
            Ok(val.map_or(RowValue::Null, RowValue::Text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::bytes::BytesMut;

    #[test]
    fn int_narrows_to_column_width() {
        let mut buf = BytesMut::new();
        let value = RowValue::Int(42);
        assert!(matches!(value.to_sql(&Type::INT4, &mut buf), Ok(IsNull::No)));
        assert_eq!(&buf[..], &42i32.to_be_bytes());

        buf.clear();
        assert!(matches!(value.to_sql(&Type::INT8, &mut buf), Ok(IsNull::No)));
        assert_eq!(&buf[..], &42i64.to_be_bytes());
    }

    #[test]
    fn int_overflow_is_rejected() {
        let mut buf = BytesMut::new();
        let value = RowValue::Int(i64::from(i32::MAX) + 1);
        assert!(value.to_sql(&Type::INT4, &mut buf).is_err());
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let mut buf = BytesMut::new();
        assert!(RowValue::Text("x".into()).to_sql(&Type::JSONB, &mut buf).is_err());
        assert!(RowValue::Json(json!({})).to_sql(&Type::TEXT, &mut buf).is_err());
        assert!(RowValue::Int(1).to_sql(&Type::TEXT, &mut buf).is_err());
        assert!(matches!(
            RowValue::Null.to_sql(&Type::TEXT, &mut buf),
            Ok(IsNull::Yes)
        ));
    }

    #[test]
    fn accepts_only_supported_types() {
        assert!(<RowValue as ToSql>::accepts(&Type::JSONB));
        assert!(<RowValue as ToSql>::accepts(&Type::INT4));
        assert!(!<RowValue as ToSql>::accepts(&Type::BOOL));
        assert!(!<RowValue as ToSql>::accepts(&Type::BYTEA));
    }

    #[test]
    fn row_lookup_by_name() {
        let names = Arc::new(vec!["id".to_string(), "name".to_string()]);
        let row = DbRow::new(names, vec![RowValue::Int(7), "Jane".into()]);
        assert_eq!(row.get("name").and_then(RowValue::as_text), Some("Jane"));
        assert_eq!(row.get_by_index(0).and_then(RowValue::as_int), Some(7));
        assert!(row.get("missing").is_none());
        assert_eq!(row.len(), 2);
    }
}
