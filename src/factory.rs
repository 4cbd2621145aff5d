use tracing::debug;

use crate::adapter::BackendAdapter;
use crate::config::{ConfigSource, ConnectionConfig};
use crate::error::SqlAccessError;
use crate::types::ProviderIdentity;

/// Turns a configured connection name into a backend adapter.
///
/// ```rust
/// use sql_access_layer::prelude::*;
///
/// let source = MapConfigSource::new().with("Main", "postgres://app@db/app", "PostgreSQL");
/// let (adapter, provider) = ProviderFactory::resolve("Main", &source)?;
/// assert_eq!(provider, ProviderIdentity::PostgreSql);
/// assert_eq!(adapter.provider(), provider);
/// # Ok::<(), SqlAccessError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFactory;

impl ProviderFactory {
    /// Look up `name` and build the adapter for its provider. No connection is opened.
    ///
    /// # Errors
    /// - `ConfigError` when the name is unknown, or its connection string or provider
    ///   name is empty, or the connection string cannot be parsed.
    /// - `UnsupportedProvider` when the provider name is not one of the supported set.
    pub fn resolve(
        name: &str,
        source: &dyn ConfigSource,
    ) -> Result<(BackendAdapter, ProviderIdentity), SqlAccessError> {
        let config = Self::load(name, source)?;
        let provider = config.provider;
        Ok((Self::from_config(&config)?, provider))
    }

    /// Look up `name` and validate it without building an adapter.
    ///
    /// # Errors
    /// As [`resolve`](Self::resolve), except the connection string is not parsed.
    pub fn load(name: &str, source: &dyn ConfigSource) -> Result<ConnectionConfig, SqlAccessError> {
        let entry = source.lookup(name).ok_or_else(|| {
            SqlAccessError::ConfigError(format!("no connection named '{name}' is configured"))
        })?;
        if entry.connection_string.trim().is_empty() {
            return Err(SqlAccessError::ConfigError(format!(
                "connection '{name}' has an empty connection string"
            )));
        }
        if entry.provider_name.trim().is_empty() {
            return Err(SqlAccessError::ConfigError(format!(
                "connection '{name}' has no provider name"
            )));
        }
        let provider = ProviderIdentity::from_provider_name(&entry.provider_name)?;
        Ok(ConnectionConfig::new(name, entry.connection_string, provider))
    }

    /// Build the adapter for an already resolved configuration.
    ///
    /// # Errors
    /// `ConfigError` when the connection string cannot be parsed; `Unimplemented` when
    /// the provider's feature is disabled.
    pub fn from_config(config: &ConnectionConfig) -> Result<BackendAdapter, SqlAccessError> {
        let adapter = BackendAdapter::for_provider(config.provider, &config.connection_string)?;
        debug!(name = %config.name, provider = %config.provider, "provider resolved");
        Ok(adapter)
    }
}
