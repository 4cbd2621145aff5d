use std::fmt;
use std::time::Duration;

use tiberius::{Client, Config, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::conn_string::AdoConnectionString;
use crate::error::SqlAccessError;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Parsed SQL Server connection settings.
///
/// Accepts ADO strings (`Server=tcp:host,1433;Database=..;User Id=..;Password=..`) and
/// JDBC URLs (`jdbc:sqlserver://host:1433;database=..`). Named instances
/// (`Server=host\SQLEXPRESS`) are resolved through the SQL Browser service.
#[derive(Clone)]
pub struct MssqlSettings {
    config: Config,
    connect_timeout: Duration,
}

impl fmt::Debug for MssqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlSettings")
            .field("addr", &self.config.get_addr())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl MssqlSettings {
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when tiberius rejects the string or the
    /// connect timeout is not a number.
    pub fn parse(raw: &str) -> Result<Self, SqlAccessError> {
        let trimmed = raw.trim();
        let jdbc = trimmed.to_ascii_lowercase().starts_with("jdbc:sqlserver://");
        let config = if jdbc {
            Config::from_jdbc_string(trimmed)
        } else {
            Config::from_ado_string(trimmed)
        }
        .map_err(|e| {
            SqlAccessError::ConfigError(format!("invalid SQL Server connection string: {e}"))
        })?;

        let connect_timeout = if jdbc {
            None
        } else {
            AdoConnectionString::parse(trimmed)?.get_seconds(&[
                "connect timeout",
                "connection timeout",
                "timeout",
            ])?
        }
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        Ok(Self {
            config,
            connect_timeout,
        })
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a new client, following one Azure gateway redirect.
    ///
    /// # Errors
    /// Returns `SqlAccessError::ConnectionError` on timeout, or the tiberius error when
    /// the TCP connect or the login fails.
    pub async fn connect(&self) -> Result<MssqlClient, SqlAccessError> {
        let connect = async {
            let client = match connect_once(self.config.clone()).await {
                Err(tiberius::error::Error::Routing { host, port }) => {
                    debug!(%host, port, "SQL Server login redirected");
                    let mut redirected = self.config.clone();
                    redirected.host(&host);
                    redirected.port(port);
                    connect_once(redirected).await?
                }
                other => other?,
            };
            Ok::<_, SqlAccessError>(client)
        };

        tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                SqlAccessError::ConnectionError(format!(
                    "SQL Server connect timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?
    }
}

async fn connect_once(config: Config) -> Result<MssqlClient, tiberius::error::Error> {
    let tcp = TcpStream::connect_named(&config).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config, tcp.compat_write()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ado_with_timeout() {
        let settings = MssqlSettings::parse(
            "Server=tcp:db.local,1444;Database=Sales;User Id=sa;Password=secret;Connect Timeout=5;TrustServerCertificate=true",
        )
        .unwrap();
        assert_eq!(settings.connect_timeout(), Duration::from_secs(5));
        assert_eq!(settings.config.get_addr(), "db.local:1444");
        assert!(!format!("{settings:?}").contains("secret"));
    }

    #[test]
    fn default_timeout_applies() {
        let settings = MssqlSettings::parse("Server=db.local;Database=Sales").unwrap();
        assert_eq!(settings.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn bad_timeout_is_config_error() {
        let err = MssqlSettings::parse("Server=db.local;Connect Timeout=soon").unwrap_err();
        assert!(matches!(err, SqlAccessError::ConfigError(_)));
    }
}
