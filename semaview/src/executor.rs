//! Result sets returned by backends, with rows decoded to JSON values.

#[cfg(feature = "duckdb")]
use duckdb::types::Value as DuckValue;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, SemaviewError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Map<String, Value>>,
}

impl QueryResult {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Read a text column of an introspection row. `NULL` yields `None`.
pub(crate) fn optional_text(row: &Map<String, Value>, column: &str) -> Result<Option<String>> {
    match row.get(column) {
        None => Err(SemaviewError::Schema(format!(
            "introspection row is missing column `{column}`"
        ))),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Ok(Some(other.to_string())),
    }
}

/// Like [`optional_text`], but `NULL` is an error.
pub(crate) fn required_text(row: &Map<String, Value>, column: &str) -> Result<String> {
    optional_text(row, column)?.ok_or_else(|| {
        SemaviewError::Schema(format!("introspection column `{column}` is NULL"))
    })
}

#[cfg(feature = "duckdb")]
pub(crate) fn duck_value_to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        DuckValue::HugeInt(i) => Value::String(i.to_string()),
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        DuckValue::Float(f) => Value::from(f),
        DuckValue::Double(f) => Value::from(f),
        DuckValue::Decimal(d) => Value::String(d.to_string()),
        DuckValue::Timestamp(unit, t) => Value::String(format!("{t} ({unit:?})")),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Blob(bytes) => Value::String(hex::encode(bytes)),
        DuckValue::Date32(d) => Value::from(d),
        DuckValue::Time64(unit, t) => Value::String(format!("{t} ({unit:?})")),
        DuckValue::Interval {
            months,
            days,
            nanos,
        } => Value::String(format!("{months} months {days} days {nanos} nanos")),
        DuckValue::List(items) | DuckValue::Array(items) => {
            Value::Array(items.into_iter().map(duck_value_to_json).collect())
        }
        DuckValue::Struct(fields) => {
            let mut map = Map::new();
            for (key, val) in fields.iter() {
                map.insert(key.clone(), duck_value_to_json(val.clone()));
            }
            Value::Object(map)
        }
        DuckValue::Map(entries) => Value::Array(
            entries
                .iter()
                .map(|(k, v)| {
                    Value::Array(vec![
                        duck_value_to_json(k.clone()),
                        duck_value_to_json(v.clone()),
                    ])
                })
                .collect(),
        ),
        DuckValue::Union(inner) => duck_value_to_json(*inner),
    }
}

#[cfg(feature = "sqlite")]
pub(crate) fn sqlite_value_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_accessors_report_missing_and_null_columns() {
        let row = json!({"view_name": "revenue", "view_schema": null, "n": 3});
        let row = row.as_object().unwrap();
        assert_eq!(required_text(row, "view_name").unwrap(), "revenue");
        assert_eq!(optional_text(row, "view_schema").unwrap(), None);
        assert_eq!(required_text(row, "n").unwrap(), "3");
        assert!(matches!(
            required_text(row, "view_schema"),
            Err(SemaviewError::Schema(_))
        ));
        assert!(matches!(
            optional_text(row, "view_sql"),
            Err(SemaviewError::Schema(_))
        ));
    }
}
