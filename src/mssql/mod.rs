//! SQL Server backend over tiberius.
//!
//! - `config`: connection-string parsing and connect/redirect handling
//! - `params`: T-SQL declarations and value binding
//! - `query`: batch generation, execution and result decoding
//! - `transaction`: explicit `BEGIN`/`COMMIT`/`ROLLBACK`

use std::sync::Arc;

use async_trait::async_trait;

mod config;
pub(crate) mod params;
pub(crate) mod query;
pub(crate) mod transaction;

pub use config::{MssqlClient, MssqlSettings};

use crate::adapter::DataAccess;
use crate::connection::{ConnectTarget, Connection};
use crate::error::SqlAccessError;
use crate::types::ProviderIdentity;

/// Adapter for `sqlclient` connections.
#[derive(Debug, Clone)]
pub struct MssqlAdapter {
    settings: Arc<MssqlSettings>,
}

impl MssqlAdapter {
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when the connection string cannot be parsed.
    pub fn new(connection_string: &str) -> Result<Self, SqlAccessError> {
        Ok(Self {
            settings: Arc::new(MssqlSettings::parse(connection_string)?),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &MssqlSettings {
        &self.settings
    }
}

#[async_trait]
impl DataAccess for MssqlAdapter {
    fn provider(&self) -> ProviderIdentity {
        ProviderIdentity::SqlServer
    }

    fn open_connection(&self) -> Connection {
        Connection::new(
            ProviderIdentity::SqlServer,
            ConnectTarget::SqlServer(Arc::clone(&self.settings)),
        )
    }
}
