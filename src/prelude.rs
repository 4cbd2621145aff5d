//! Convenient imports for common functionality.
//!
//! `use sql_access_layer::prelude::*;` brings in the manager, command and parameter
//! types, the configuration sources and the result types.

pub use crate::adapter::{BackendAdapter, DataAccess};
pub use crate::command::{BulkFiller, Command, CommandSpec};
pub use crate::config::{
    AppSettings, ConfigSource, ConnectionConfig, ConnectionEntry, EnvConfigSource,
    MapConfigSource,
};
pub use crate::connection::{Connection, ConnectionStatus, Transaction};
pub use crate::db_types::{DbType, MySqlType, PostgresType, SqlServerType, TypeTag};
pub use crate::error::{ErrorKind, SqlAccessError};
pub use crate::factory::ProviderFactory;
pub use crate::manager::{AccessManager, ManagerOptions};
pub use crate::mapper::{RowMapper, SerdeRowMapper, row_value_to_json};
pub use crate::params::{IntoParams, Parameter, ParameterBuilder, ParameterSpec};
pub use crate::reader::StreamingReader;
pub use crate::results::{CustomDbRow, DataSet, ExecuteOutcome, OutputValues, ResultSet};
pub use crate::translation::{PlaceholderStyle, rewrite_named_placeholders};
pub use crate::types::{
    CommandKind, IsolationLevel, ParameterDirection, ProviderIdentity, RowValues,
};

#[cfg(feature = "mssql")]
pub use crate::mssql::MssqlAdapter;
#[cfg(feature = "mysql")]
pub use crate::mysql::MysqlAdapter;
#[cfg(feature = "postgres")]
pub use crate::postgres::PostgresAdapter;
