use std::fmt;
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::Connection;

use crate::conn_string::{AdoConnectionString, is_url, split_host_port};
use crate::error::SqlAccessError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Parsed `MySQL` connection settings.
///
/// Accepts `mysql://user:pw@host:3306/db` URLs and ADO-style strings
/// (`Server=h;Port=3306;Database=d;Uid=u;Pwd=p`).
#[derive(Clone)]
pub struct MysqlSettings {
    options: MySqlConnectOptions,
    connect_timeout: Duration,
}

impl fmt::Debug for MysqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlSettings")
            .field("host", &self.options.get_host())
            .field("port", &self.options.get_port())
            .field("database", &self.options.get_database())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl MysqlSettings {
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when the string cannot be parsed.
    pub fn parse(raw: &str) -> Result<Self, SqlAccessError> {
        let trimmed = raw.trim();
        if is_url(trimmed, &["mysql", "mariadb"]) {
            let options = trimmed.parse::<MySqlConnectOptions>().map_err(|e| {
                SqlAccessError::ConfigError(format!("invalid MySQL connection URL: {e}"))
            })?;
            return Ok(Self {
                options,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            });
        }

        let ado = AdoConnectionString::parse(trimmed)?;
        let host = ado
            .get(&["server", "host", "data source", "datasource", "address"])
            .ok_or_else(|| SqlAccessError::ConfigError("connection string has no Server".into()))?;
        let (host, inline_port) = split_host_port(host)?;
        let mut options = MySqlConnectOptions::new().host(&host);

        let port = match ado.get(&["port"]) {
            Some(p) => Some(p.trim().parse::<u16>().map_err(|_| {
                SqlAccessError::ConfigError(format!("invalid Port '{p}'"))
            })?),
            None => inline_port,
        };
        if let Some(port) = port {
            options = options.port(port);
        }
        if let Some(db) = ado.get(&["database", "initial catalog"]) {
            options = options.database(db);
        }
        if let Some(user) = ado.get(&["uid", "user id", "user", "username"]) {
            options = options.username(user);
        }
        if let Some(password) = ado.get(&["pwd", "password"]) {
            options = options.password(password);
        }
        if let Some(charset) = ado.get(&["charset", "character set"]) {
            options = options.charset(charset);
        }
        if let Some(mode) = ado.get(&["ssl mode", "sslmode"]) {
            let mode = match mode.trim().to_ascii_lowercase().as_str() {
                "none" | "disabled" => MySqlSslMode::Disabled,
                "preferred" => MySqlSslMode::Preferred,
                "required" => MySqlSslMode::Required,
                "verifyca" => MySqlSslMode::VerifyCa,
                "verifyfull" | "verifyidentity" => MySqlSslMode::VerifyIdentity,
                other => {
                    return Err(SqlAccessError::ConfigError(format!(
                        "unknown SSL Mode '{other}'"
                    )));
                }
            };
            options = options.ssl_mode(mode);
        }
        let connect_timeout = ado
            .get_seconds(&["connect timeout", "connection timeout", "connecttimeout"])?
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        Ok(Self {
            options,
            connect_timeout,
        })
    }

    /// # Errors
    /// Returns `SqlAccessError::ConnectionError` on timeout, or the sqlx error when the
    /// server refuses the connection.
    pub async fn connect(&self) -> Result<MySqlConnection, SqlAccessError> {
        tokio::time::timeout(
            self.connect_timeout,
            MySqlConnection::connect_with(&self.options),
        )
        .await
        .map_err(|_| {
            SqlAccessError::ConnectionError(format!(
                "MySQL connect timed out after {}s",
                self.connect_timeout.as_secs()
            ))
        })?
        .map_err(SqlAccessError::from)
    }
}
