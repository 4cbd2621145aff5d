//! MySQL backend over sqlx.
//!
//! - `config`: URL and ADO-style connection strings
//! - `params`: value binding and identifier quoting
//! - `query`: placeholder rewriting, procedure calls and result decoding
//! - `transaction`: `START TRANSACTION`/`COMMIT`/`ROLLBACK`

use std::sync::Arc;

use async_trait::async_trait;

mod config;
pub(crate) mod params;
pub(crate) mod query;
pub(crate) mod transaction;

pub use config::MysqlSettings;

use crate::adapter::DataAccess;
use crate::connection::{ConnectTarget, Connection};
use crate::error::SqlAccessError;
use crate::types::ProviderIdentity;

/// Adapter for `mysqlclient` connections.
#[derive(Debug, Clone)]
pub struct MysqlAdapter {
    settings: Arc<MysqlSettings>,
}

impl MysqlAdapter {
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when the connection string cannot be parsed.
    pub fn new(connection_string: &str) -> Result<Self, SqlAccessError> {
        Ok(Self {
            settings: Arc::new(MysqlSettings::parse(connection_string)?),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &MysqlSettings {
        &self.settings
    }
}

#[async_trait]
impl DataAccess for MysqlAdapter {
    fn provider(&self) -> ProviderIdentity {
        ProviderIdentity::MySql
    }

    fn open_connection(&self) -> Connection {
        Connection::new(
            ProviderIdentity::MySql,
            ConnectTarget::MySql(Arc::clone(&self.settings)),
        )
    }
}
