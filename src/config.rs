use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::SqlAccessError;
use crate::types::ProviderIdentity;

/// A named connection as stored in configuration, before the provider is validated.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub connection_string: String,
    pub provider_name: String,
}

impl ConnectionEntry {
    pub fn new(connection_string: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            provider_name: provider_name.into(),
        }
    }
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("connection_string", &"<redacted>")
            .field("provider_name", &self.provider_name)
            .finish()
    }
}

/// A resolved connection: the provider is known to be supported.
///
/// Immutable once resolved. `Debug` never prints the connection string since it
/// usually carries credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub name: String,
    pub connection_string: String,
    pub provider: ProviderIdentity,
}

impl ConnectionConfig {
    pub fn new(
        name: impl Into<String>,
        connection_string: impl Into<String>,
        provider: ProviderIdentity,
    ) -> Self {
        Self {
            name: name.into(),
            connection_string: connection_string.into(),
            provider,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("connection_string", &"<redacted>")
            .field("provider", &self.provider)
            .finish()
    }
}

/// Where named connections come from.
///
/// The access layer only ever asks for one entry by name; how the entries are stored
/// is up to the implementation.
pub trait ConfigSource: Send + Sync {
    fn lookup(&self, name: &str) -> Option<ConnectionEntry>;
}

/// In-memory connection table, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    entries: HashMap<String, ConnectionEntry>,
}

impl MapConfigSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(
        mut self,
        name: impl Into<String>,
        connection_string: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        self.insert(name, ConnectionEntry::new(connection_string, provider_name));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: ConnectionEntry) {
        self.entries.insert(name.into(), entry);
    }
}

impl ConfigSource for MapConfigSource {
    fn lookup(&self, name: &str) -> Option<ConnectionEntry> {
        self.entries.get(name).cloned()
    }
}

/// Reads `CONNECTIONSTRINGS__<NAME>` and `CONNECTIONSTRINGS__<NAME>__PROVIDERNAME`.
///
/// The variables are captured when the source is created.
#[derive(Debug, Clone)]
pub struct EnvConfigSource {
    prefix: String,
    vars: HashMap<String, String>,
}

impl EnvConfigSource {
    pub const DEFAULT_PREFIX: &'static str = "CONNECTIONSTRINGS__";

    /// Snapshot the current process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit variables instead of the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: Self::DEFAULT_PREFIX.to_string(),
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into().to_ascii_uppercase(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().to_ascii_uppercase();
        self
    }
}

impl Default for EnvConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for EnvConfigSource {
    fn lookup(&self, name: &str) -> Option<ConnectionEntry> {
        let key = format!("{}{}", self.prefix, name.to_ascii_uppercase());
        let connection_string = self.vars.get(&key)?.clone();
        let provider_name = self
            .vars
            .get(&format!("{key}__PROVIDERNAME"))
            .cloned()
            .unwrap_or_default();
        Some(ConnectionEntry {
            connection_string,
            provider_name,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConnectionSetting {
    Plain(String),
    Detailed {
        #[serde(alias = "connectionString")]
        #[serde(rename = "ConnectionString")]
        connection_string: String,
        #[serde(alias = "providerName")]
        #[serde(rename = "ProviderName", default)]
        provider_name: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct SettingsFile {
    #[serde(rename = "ConnectionStrings", alias = "connectionStrings", default)]
    connection_strings: HashMap<String, ConnectionSetting>,
}

/// `appsettings.json`-shaped configuration.
///
/// Both layouts found in the wild are accepted:
/// ```json
/// { "ConnectionStrings": {
///     "Main": "Server=db;Database=app;User Id=app;Password=secret",
///     "Main:ProviderName": "sqlclient",
///     "Reports": { "ConnectionString": "Host=pg;Database=rpt", "ProviderName": "postgresql" }
/// } }
/// ```
/// Names are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    entries: HashMap<String, ConnectionEntry>,
}

impl AppSettings {
    /// Load from a JSON file.
    ///
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SqlAccessError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SqlAccessError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse JSON text.
    ///
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when the text is not a valid settings document.
    pub fn from_json_str(raw: &str) -> Result<Self, SqlAccessError> {
        let file: SettingsFile = serde_json::from_str(raw)
            .map_err(|e| SqlAccessError::ConfigError(format!("invalid settings JSON: {e}")))?;

        let mut providers: HashMap<String, String> = HashMap::new();
        let mut strings: Vec<(String, String, Option<String>)> = Vec::new();
        for (key, setting) in file.connection_strings {
            match (key.rsplit_once(':'), setting) {
                (Some((name, suffix)), ConnectionSetting::Plain(provider))
                    if suffix.eq_ignore_ascii_case("ProviderName") =>
                {
                    providers.insert(name.to_ascii_lowercase(), provider);
                }
                (_, ConnectionSetting::Plain(conn)) => strings.push((key, conn, None)),
                (
                    _,
                    ConnectionSetting::Detailed {
                        connection_string,
                        provider_name,
                    },
                ) => strings.push((key, connection_string, provider_name)),
            }
        }

        let entries = strings
            .into_iter()
            .map(|(name, connection_string, provider)| {
                let lowered = name.to_ascii_lowercase();
                let provider_name = provider
                    .or_else(|| providers.remove(&lowered))
                    .unwrap_or_default();
                (
                    lowered,
                    ConnectionEntry {
                        connection_string,
                        provider_name,
                    },
                )
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl ConfigSource for AppSettings {
    fn lookup(&self, name: &str) -> Option<ConnectionEntry> {
        self.entries.get(&name.to_ascii_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appsettings_flat_and_nested_forms() {
        let settings = AppSettings::from_json_str(
            r#"{
                "Logging": { "LogLevel": { "Default": "Information" } },
                "ConnectionStrings": {
                    "Main": "Server=db;Database=app",
                    "Main:ProviderName": "SqlClient",
                    "Reports": { "ConnectionString": "Host=pg", "ProviderName": "postgresql" },
                    "Orphan": "Server=x"
                }
            }"#,
        )
        .unwrap();

        let main = settings.lookup("main").unwrap();
        assert_eq!(main.connection_string, "Server=db;Database=app");
        assert_eq!(main.provider_name, "SqlClient");

        let reports = settings.lookup("Reports").unwrap();
        assert_eq!(reports.provider_name, "postgresql");

        assert_eq!(settings.lookup("Orphan").unwrap().provider_name, "");
        assert!(settings.lookup("missing").is_none());
        assert!(settings.lookup("Main:ProviderName").is_none());
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        assert!(matches!(
            AppSettings::from_json_str("{ not json"),
            Err(SqlAccessError::ConfigError(_))
        ));
    }

    #[test]
    fn env_source_reads_prefixed_variables() {
        let env = EnvConfigSource::from_vars([
            ("CONNECTIONSTRINGS__MAIN", "Host=pg;Database=app"),
            ("ConnectionStrings__Main__ProviderName", "postgresql"),
        ]);
        let entry = env.lookup("Main").unwrap();
        assert_eq!(entry.connection_string, "Host=pg;Database=app");
        assert_eq!(entry.provider_name, "postgresql");
        assert!(env.lookup("Other").is_none());
    }

    #[test]
    fn debug_output_redacts_connection_string() {
        let config = ConnectionConfig::new("main", "Password=hunter2", ProviderIdentity::MySql);
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("MySql"));
    }
}
