use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

use crate::error::SqlAccessError;
use crate::results::CustomDbRow;
use crate::types::RowValues;

/// Decodes one raw row into a caller-chosen type.
///
/// [`AccessManager::query`](crate::manager::AccessManager::query) and friends run every
/// row through a mapper. The default, [`SerdeRowMapper`], goes through `serde_json`.
pub trait RowMapper: Send + Sync {
    /// # Errors
    /// Returns `SqlAccessError::DecodeError` when the row does not fit `T`.
    fn map_row<T: DeserializeOwned>(&self, row: &CustomDbRow) -> Result<T, SqlAccessError>;
}

/// Maps rows with serde.
///
/// Single-column rows are first tried as a scalar (`query::<i64>`), then as a struct.
/// Wider rows are tried as a struct keyed by column name, then as a tuple.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeRowMapper;

impl RowMapper for SerdeRowMapper {
    fn map_row<T: DeserializeOwned>(&self, row: &CustomDbRow) -> Result<T, SqlAccessError> {
        let object = || {
            JsonValue::Object(
                row.column_names
                    .iter()
                    .zip(&row.rows)
                    .map(|(name, value)| (name.clone(), row_value_to_json(value)))
                    .collect::<Map<_, _>>(),
            )
        };

        if row.rows.len() == 1 {
            let scalar = row_value_to_json(&row.rows[0]);
            return serde_json::from_value(scalar)
                .or_else(|_| serde_json::from_value(object()))
                .map_err(|e| decode_error(row, &e));
        }

        serde_json::from_value(object())
            .or_else(|first| {
                let array = JsonValue::Array(row.rows.iter().map(row_value_to_json).collect());
                serde_json::from_value(array).map_err(|_| first)
            })
            .map_err(|e| decode_error(row, &e))
    }
}

fn decode_error(row: &CustomDbRow, err: &serde_json::Error) -> SqlAccessError {
    SqlAccessError::DecodeError(format!(
        "cannot map row with columns [{}]: {err}",
        row.column_names.join(", ")
    ))
}

/// JSON rendering of a row value.
#[must_use]
pub fn row_value_to_json(value: &RowValues) -> JsonValue {
    match value {
        RowValues::Int(i) => JsonValue::from(*i),
        RowValues::Float(f) => JsonValue::from(*f),
        RowValues::Text(s) => JsonValue::String(s.clone()),
        RowValues::Bool(b) => JsonValue::Bool(*b),
        RowValues::Timestamp(ts) => {
            JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        RowValues::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
        RowValues::Null => JsonValue::Null,
        RowValues::JSON(j) => j.clone(),
        RowValues::Blob(bytes) => {
            JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Customer {
        id: i64,
        name: String,
        since: Option<NaiveDate>,
    }

    fn row(cols: &[&str], values: Vec<RowValues>) -> CustomDbRow {
        CustomDbRow::new(
            Arc::new(cols.iter().map(ToString::to_string).collect()),
            values,
        )
    }

    #[test]
    fn maps_struct_by_column_name() {
        let r = row(
            &["id", "name", "since"],
            vec![
                RowValues::Int(3),
                RowValues::Text("Ada".into()),
                RowValues::Date(NaiveDate::from_ymd_opt(2020, 5, 1).unwrap()),
            ],
        );
        let c: Customer = SerdeRowMapper.map_row(&r).unwrap();
        assert_eq!(c.name, "Ada");
        assert_eq!(c.since, NaiveDate::from_ymd_opt(2020, 5, 1));
    }

    #[test]
    fn single_column_maps_to_scalar() {
        let r = row(&["count"], vec![RowValues::Int(12)]);
        let n: i64 = SerdeRowMapper.map_row(&r).unwrap();
        assert_eq!(n, 12);
        let missing: Option<String> = SerdeRowMapper
            .map_row(&row(&["x"], vec![RowValues::Null]))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn tuples_map_by_position() {
        let r = row(&["a", "b"], vec![RowValues::Int(1), RowValues::Bool(true)]);
        let t: (i64, bool) = SerdeRowMapper.map_row(&r).unwrap();
        assert_eq!(t, (1, true));
    }

    #[test]
    fn mismatch_is_a_decode_error() {
        let r = row(&["id", "name"], vec![RowValues::Text("x".into()), RowValues::Null]);
        let err = SerdeRowMapper.map_row::<Customer>(&r).unwrap_err();
        assert!(matches!(err, SqlAccessError::DecodeError(_)));
    }
}
