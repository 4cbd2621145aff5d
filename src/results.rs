use std::collections::HashMap;
use std::sync::Arc;

use crate::types::RowValues;

/// A row from a database query result
///
/// Column names are shared across every row of the result set that produced it.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    // Internal cache for faster column lookups
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

pub(crate) fn index_columns(column_names: &[String]) -> Arc<HashMap<String, usize>> {
    let mut cache = HashMap::with_capacity(column_names.len());
    // first occurrence wins for duplicated column names
    for (i, name) in column_names.iter().enumerate() {
        cache.entry(name.clone()).or_insert(i);
    }
    Arc::new(cache)
}

impl CustomDbRow {
    /// Create a new database row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let cache = index_columns(&column_names);
        Self {
            column_names,
            rows,
            column_index_cache: cache,
        }
    }

    /// Get the index of a column by name
    ///
    /// Exact matches are tried first, then a case-insensitive match, since
    /// backends differ in how they fold unquoted identifiers.
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names
            .iter()
            .position(|col| col.eq_ignore_ascii_case(column_name))
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A result set from a database query
///
/// This struct represents one tabular result produced by a command,
/// containing the rows and the column names they share.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// The number of rows in `results`
    pub rows_affected: usize,
    column_names: Option<Arc<Vec<String>>>,
    column_index_cache: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    /// Create a new result set with a known capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            rows_affected: 0,
            column_names: None,
            column_index_cache: None,
        }
    }

    /// Create an empty result set that already knows its columns.
    #[must_use]
    pub fn with_columns(column_names: Arc<Vec<String>>) -> ResultSet {
        let mut rs = ResultSet::default();
        rs.set_column_names(column_names);
        rs
    }

    /// Set the column names for this result set (to be shared by all rows)
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_index_cache = Some(index_columns(&column_names));
        self.column_names = Some(column_names);
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Add a row to the result set
    ///
    /// Rows added before the column names are known are dropped.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let (Some(column_names), Some(cache)) = (&self.column_names, &self.column_index_cache) {
            self.results.push(CustomDbRow {
                column_names: column_names.clone(),
                rows: row_values,
                column_index_cache: cache.clone(),
            });
            self.rows_affected += 1;
        }
    }

    /// Add an already built row to the result set
    pub fn add_row(&mut self, row: CustomDbRow) {
        if self.column_names.is_none() {
            self.column_names = Some(row.column_names.clone());
            self.column_index_cache = Some(row.column_index_cache.clone());
        }
        self.results.push(row);
        self.rows_affected += 1;
    }

    /// First column of the first row, if any.
    #[must_use]
    pub fn first_value(&self) -> Option<&RowValues> {
        self.results.first().and_then(|row| row.get_by_index(0))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Values read back from output, input/output and return-value parameters.
///
/// Only populated after the command has fully executed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputValues {
    values: Vec<(String, RowValues)>,
    return_value: Option<RowValues>,
}

impl OutputValues {
    pub(crate) fn insert(&mut self, name: impl Into<String>, value: RowValues) {
        let name = name.into();
        if let Some(slot) = self.values.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            slot.1 = value;
        } else {
            self.values.push((name, value));
        }
    }

    pub(crate) fn set_return_value(&mut self, value: RowValues) {
        self.return_value = Some(value);
    }

    /// Output value by parameter name, with or without a leading `@`/`:`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RowValues> {
        let name = name.trim_start_matches(['@', ':', '?']);
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn return_value(&self) -> Option<&RowValues> {
        self.return_value.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.return_value.is_none()
    }
}

/// Every result set a command produced, in order, plus its output parameters.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    pub result_sets: Vec<ResultSet>,
    pub outputs: OutputValues,
}

impl DataSet {
    #[must_use]
    pub fn first(&self) -> Option<&ResultSet> {
        self.result_sets.first()
    }

    /// Take ownership of the first result set, discarding the rest.
    #[must_use]
    pub fn into_first(self) -> Option<ResultSet> {
        self.result_sets.into_iter().next()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.result_sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result_sets.is_empty()
    }
}

/// Result of a non-query command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutcome {
    /// Rows affected as reported by the driver
    pub rows_affected: u64,
    pub outputs: OutputValues,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        let mut rs = ResultSet::with_columns(Arc::new(vec!["Id".into(), "Name".into()]));
        rs.add_row_values(vec![RowValues::Int(1), RowValues::Text("a".into())]);
        rs.add_row_values(vec![RowValues::Int(2), RowValues::Text("b".into())]);
        rs
    }

    #[test]
    fn column_lookup_falls_back_to_case_insensitive() {
        let rs = sample();
        let row = &rs.results[1];
        assert_eq!(row.get("Id"), Some(&RowValues::Int(2)));
        assert_eq!(row.get("name"), Some(&RowValues::Text("b".into())));
        assert!(row.get("missing").is_none());
        assert_eq!(rs.rows_affected, 2);
        assert_eq!(rs.first_value(), Some(&RowValues::Int(1)));
    }

    #[test]
    fn rows_without_columns_are_ignored() {
        let mut rs = ResultSet::with_capacity(1);
        rs.add_row_values(vec![RowValues::Null]);
        assert!(rs.is_empty());
    }

    #[test]
    fn output_values_strip_prefix() {
        let mut out = OutputValues::default();
        out.insert("NewId", RowValues::Int(7));
        out.insert("newid", RowValues::Int(8));
        assert_eq!(out.get("@NewId"), Some(&RowValues::Int(8)));
        assert_eq!(out.iter().count(), 1);
        assert!(out.return_value().is_none());
    }
}
