//! PostgreSQL backend over tokio-postgres.
//!
//! - `config`: URL, key/value and ADO-style connection strings
//! - `params`: `ToSql` for row values and the `numeric` wire format
//! - `query`: placeholder rewriting, preparation and result decoding
//! - `transaction`: `BEGIN`/`COMMIT`/`ROLLBACK`

use std::sync::Arc;

use async_trait::async_trait;

mod config;
pub(crate) mod params;
pub(crate) mod query;
pub(crate) mod transaction;

pub use config::{PgConnection, PostgresSettings};

use crate::adapter::DataAccess;
use crate::connection::{ConnectTarget, Connection};
use crate::error::SqlAccessError;
use crate::types::ProviderIdentity;

/// Adapter for `postgresql` connections.
#[derive(Debug, Clone)]
pub struct PostgresAdapter {
    settings: Arc<PostgresSettings>,
}

impl PostgresAdapter {
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when the connection string cannot be parsed.
    pub fn new(connection_string: &str) -> Result<Self, SqlAccessError> {
        Ok(Self {
            settings: Arc::new(PostgresSettings::parse(connection_string)?),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &PostgresSettings {
        &self.settings
    }
}

#[async_trait]
impl DataAccess for PostgresAdapter {
    fn provider(&self) -> ProviderIdentity {
        ProviderIdentity::PostgreSql
    }

    fn open_connection(&self) -> Connection {
        Connection::new(
            ProviderIdentity::PostgreSql,
            ConnectTarget::Postgres(Arc::clone(&self.settings)),
        )
    }
}
