use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde_json::Value as JsonValue;

use crate::error::SqlAccessError;

/// Values that can be stored in a database row or used as command parameters.
///
/// The same enum is used for every backend so calling code never has to branch on
/// driver types:
/// ```rust
/// use sql_access_layer::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value. Exact decimals are also carried as text.
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// Calendar date
    Date(NaiveDate),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            RowValues::Timestamp(value) => Some(*value),
            RowValues::Date(date) => date.and_hms_opt(0, 0, 0),
            RowValues::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            RowValues::Int(_) => "Int",
            RowValues::Float(_) => "Float",
            RowValues::Text(_) => "Text",
            RowValues::Bool(_) => "Bool",
            RowValues::Timestamp(_) => "Timestamp",
            RowValues::Date(_) => "Date",
            RowValues::Null => "Null",
            RowValues::JSON(_) => "JSON",
            RowValues::Blob(_) => "Blob",
        }
    }
}

/// Parse the timestamp layouts the backends hand back as text.
pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const LAYOUTS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(s, layout).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<i32> for RowValues {
    fn from(value: i32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(value: NaiveDateTime) -> Self {
        RowValues::Timestamp(value)
    }
}

impl From<NaiveDate> for RowValues {
    fn from(value: NaiveDate) -> Self {
        RowValues::Date(value)
    }
}

impl From<Vec<u8>> for RowValues {
    fn from(value: Vec<u8>) -> Self {
        RowValues::Blob(value)
    }
}

impl From<JsonValue> for RowValues {
    fn from(value: JsonValue) -> Self {
        RowValues::JSON(value)
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}

/// The database engines this layer can talk to.
///
/// Every place that dispatches on the backend matches this enum, so adding an
/// engine means adding a variant here and satisfying the adapter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ProviderIdentity {
    /// SQL Server via Tiberius
    #[value(name = "sqlclient")]
    SqlServer,
    /// `PostgreSQL` via tokio-postgres
    #[value(name = "postgresql")]
    PostgreSql,
    /// `MySQL` via sqlx
    #[value(name = "mysqlclient")]
    MySql,
}

impl ProviderIdentity {
    pub const ALL: [ProviderIdentity; 3] = [
        ProviderIdentity::SqlServer,
        ProviderIdentity::PostgreSql,
        ProviderIdentity::MySql,
    ];

    /// Canonical provider name as written in connection configuration.
    #[must_use]
    pub fn provider_name(self) -> &'static str {
        match self {
            ProviderIdentity::SqlServer => "sqlclient",
            ProviderIdentity::PostgreSql => "postgresql",
            ProviderIdentity::MySql => "mysqlclient",
        }
    }

    /// Match a configured provider name, ignoring case and surrounding whitespace.
    ///
    /// # Errors
    /// Returns `SqlAccessError::UnsupportedProvider` carrying the raw string when it
    /// names no supported provider.
    pub fn from_provider_name(raw: &str) -> Result<Self, SqlAccessError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlclient" | "system.data.sqlclient" | "microsoft.data.sqlclient" => {
                Ok(ProviderIdentity::SqlServer)
            }
            "postgresql" | "npgsql" => Ok(ProviderIdentity::PostgreSql),
            "mysqlclient" | "mysql.data.mysqlclient" | "mysqlconnector" => {
                Ok(ProviderIdentity::MySql)
            }
            _ => Err(SqlAccessError::unsupported_provider(raw)),
        }
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_name())
    }
}

impl FromStr for ProviderIdentity {
    type Err = SqlAccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_provider_name(s)
    }
}

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CommandKind {
    /// Literal SQL text
    #[default]
    Text,
    /// Name of a stored procedure (or function, on `PostgreSQL`)
    StoredProcedure,
    /// Name of a table whose rows are all returned
    TableDirect,
}

/// Transaction isolation level, passed through to the backend unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    /// Row-versioned snapshot; backends without it use their closest equivalent
    Snapshot,
}

impl IsolationLevel {
    /// The ANSI spelling used in `SET TRANSACTION ISOLATION LEVEL ...`.
    #[must_use]
    pub fn ansi_name(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

/// Direction of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// Whether the parameter carries a value into the command.
    #[must_use]
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    /// Whether a value is read back after execution.
    #[must_use]
    pub fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::InputOutput | Self::ReturnValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!(
            ProviderIdentity::from_provider_name("SqlClient").unwrap(),
            ProviderIdentity::SqlServer
        );
        assert_eq!(
            ProviderIdentity::from_provider_name("  PostgreSQL ").unwrap(),
            ProviderIdentity::PostgreSql
        );
        assert_eq!(
            ProviderIdentity::from_provider_name("MYSQLCLIENT").unwrap(),
            ProviderIdentity::MySql
        );
        assert_eq!(
            "Npgsql".parse::<ProviderIdentity>().unwrap(),
            ProviderIdentity::PostgreSql
        );
    }

    #[test]
    fn unknown_provider_keeps_raw_string() {
        let err = ProviderIdentity::from_provider_name("Oracle.ManagedDataAccess").unwrap_err();
        match err {
            SqlAccessError::UnsupportedProvider { provider, requested } => {
                assert_eq!(provider, "Oracle.ManagedDataAccess");
                assert!(requested.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn canonical_names_round_trip() {
        for provider in ProviderIdentity::ALL {
            assert_eq!(
                ProviderIdentity::from_provider_name(provider.provider_name()).unwrap(),
                provider
            );
        }
    }

    #[test]
    fn timestamps_parse_from_text() {
        let value = RowValues::Text("2024-03-01 10:15:00".into());
        let ts = value.as_timestamp().unwrap();
        assert_eq!(ts.to_string(), "2024-03-01 10:15:00");
        assert!(RowValues::Text("yesterday".into()).as_timestamp().is_none());
    }

    #[test]
    fn option_into_row_values() {
        assert_eq!(RowValues::from(None::<i64>), RowValues::Null);
        assert_eq!(RowValues::from(Some("x")), RowValues::Text("x".into()));
    }
}
