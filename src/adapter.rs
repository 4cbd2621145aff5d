//! The contract every backend implements, and the enum that dispatches to them.

use async_trait::async_trait;

use crate::command::{BulkFiller, Command};
use crate::connection::Connection;
use crate::db_types::TypeTag;
use crate::error::SqlAccessError;
use crate::params::{Parameter, ParameterBuilder, ParameterSpec};
use crate::types::{CommandKind, ParameterDirection, ProviderIdentity, RowValues};

#[cfg(feature = "mssql")]
use crate::mssql::MssqlAdapter;
#[cfg(feature = "mysql")]
use crate::mysql::MysqlAdapter;
#[cfg(feature = "postgres")]
use crate::postgres::PostgresAdapter;

/// Uniform access to one backend.
///
/// Only [`provider`](Self::provider) and [`open_connection`](Self::open_connection) are
/// backend specific; the rest is shared.
#[async_trait]
pub trait DataAccess: Send + Sync {
    fn provider(&self) -> ProviderIdentity;

    /// A new connection in the `Unopened` state.
    fn open_connection(&self) -> Connection;

    /// Idempotent; never fails. Problems while closing are logged.
    async fn close_connection(&self, conn: &mut Connection) {
        conn.close().await;
    }

    /// Bind `text` to `conn` without executing it.
    ///
    /// # Errors
    /// `UnsupportedProvider` when `conn` belongs to another backend.
    fn create_command<'c>(
        &self,
        text: &str,
        kind: CommandKind,
        conn: &'c mut Connection,
    ) -> Result<Command<'c>, SqlAccessError> {
        if conn.provider() != self.provider() {
            return Err(SqlAccessError::unsupported_provider(
                conn.provider().provider_name(),
            ));
        }
        Ok(conn.create_command(text, kind))
    }

    fn create_adapter<'c>(&self, command: Command<'c>) -> BulkFiller<'c> {
        BulkFiller::new(command)
    }

    /// Build a parameter for this backend with an explicit type tag.
    ///
    /// Goes through [`ParameterBuilder::build`]: the name is normalized, a generic tag
    /// is resolved to this backend's type and a tag from another backend is rejected.
    /// The value, tag and direction are kept as given.
    ///
    /// # Errors
    /// See [`ParameterBuilder::build`].
    fn create_parameter(
        &self,
        name: &str,
        value: RowValues,
        type_tag: TypeTag,
        direction: ParameterDirection,
    ) -> Result<Parameter, SqlAccessError> {
        ParameterBuilder::new(self.provider()).build(
            &ParameterSpec::new(name, value)
                .typed(type_tag)
                .direction(direction),
        )
    }
}

/// One adapter per supported provider.
#[derive(Debug, Clone)]
pub enum BackendAdapter {
    #[cfg(feature = "mssql")]
    SqlServer(MssqlAdapter),
    #[cfg(feature = "postgres")]
    Postgres(PostgresAdapter),
    #[cfg(feature = "mysql")]
    MySql(MysqlAdapter),
}

impl BackendAdapter {
    /// Build the adapter for `provider`, bound to `connection_string`. Nothing is opened.
    ///
    /// # Errors
    /// - `ConfigError` when the connection string cannot be parsed.
    /// - `Unimplemented` when the provider's feature is not compiled in.
    pub fn for_provider(
        provider: ProviderIdentity,
        connection_string: &str,
    ) -> Result<Self, SqlAccessError> {
        match provider {
            #[cfg(feature = "mssql")]
            ProviderIdentity::SqlServer => Ok(Self::SqlServer(MssqlAdapter::new(
                connection_string,
            )?)),
            #[cfg(feature = "postgres")]
            ProviderIdentity::PostgreSql => Ok(Self::Postgres(PostgresAdapter::new(
                connection_string,
            )?)),
            #[cfg(feature = "mysql")]
            ProviderIdentity::MySql => Ok(Self::MySql(MysqlAdapter::new(connection_string)?)),
            #[allow(unreachable_patterns)]
            other => Err(SqlAccessError::Unimplemented(format!(
                "{other} support requires the `{}` feature",
                feature_name(other)
            ))),
        }
    }
}

#[allow(dead_code)]
fn feature_name(provider: ProviderIdentity) -> &'static str {
    match provider {
        ProviderIdentity::SqlServer => "mssql",
        ProviderIdentity::PostgreSql => "postgres",
        ProviderIdentity::MySql => "mysql",
    }
}

#[async_trait]
impl DataAccess for BackendAdapter {
    fn provider(&self) -> ProviderIdentity {
        match self {
            #[cfg(feature = "mssql")]
            Self::SqlServer(adapter) => adapter.provider(),
            #[cfg(feature = "postgres")]
            Self::Postgres(adapter) => adapter.provider(),
            #[cfg(feature = "mysql")]
            Self::MySql(adapter) => adapter.provider(),
        }
    }

    fn open_connection(&self) -> Connection {
        match self {
            #[cfg(feature = "mssql")]
            Self::SqlServer(adapter) => adapter.open_connection(),
            #[cfg(feature = "postgres")]
            Self::Postgres(adapter) => adapter.open_connection(),
            #[cfg(feature = "mysql")]
            Self::MySql(adapter) => adapter.open_connection(),
        }
    }
}
