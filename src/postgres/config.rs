use std::fmt;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::warn;

use crate::conn_string::{AdoConnectionString, is_url, split_host_port};
use crate::error::SqlAccessError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Parsed `PostgreSQL` connection settings.
///
/// Three spellings are accepted: URLs (`postgres://user:pw@host:5432/db`), libpq
/// key/value strings (`host=h user=u dbname=d`) and ADO-style strings
/// (`Host=h;Port=5432;Database=d;Username=u;Password=p`).
#[derive(Clone)]
pub struct PostgresSettings {
    config: PgConfig,
}

impl fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("hosts", &self.config.get_hosts())
            .field("dbname", &self.config.get_dbname())
            .field("user", &self.config.get_user())
            .finish_non_exhaustive()
    }
}

/// A live client plus the task driving its socket.
pub struct PgConnection {
    pub(crate) client: Client,
    driver: JoinHandle<()>,
}

impl PgConnection {
    /// Drop the client and wait for the driver task to send Terminate and exit.
    pub(crate) async fn close(self) {
        let PgConnection { client, driver } = self;
        drop(client);
        if let Err(e) = driver.await {
            warn!(error = %e, "postgres connection task did not finish cleanly");
        }
    }
}

impl PostgresSettings {
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when the string cannot be parsed.
    pub fn parse(raw: &str) -> Result<Self, SqlAccessError> {
        let trimmed = raw.trim();
        let mut config = if is_url(trimmed, &["postgres", "postgresql"]) || !trimmed.contains(';')
        {
            trimmed.parse::<PgConfig>().map_err(|e| {
                SqlAccessError::ConfigError(format!("invalid PostgreSQL connection string: {e}"))
            })?
        } else {
            from_ado(&AdoConnectionString::parse(trimmed)?)?
        };
        if config.get_connect_timeout().is_none() {
            config.connect_timeout(DEFAULT_CONNECT_TIMEOUT);
        }
        Ok(Self { config })
    }

    /// # Errors
    /// Returns the tokio-postgres error when the connection cannot be established.
    pub async fn connect(&self) -> Result<PgConnection, SqlAccessError> {
        let (client, connection) = self.config.connect(NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection terminated with error");
            }
        });
        Ok(PgConnection { client, driver })
    }
}

fn from_ado(ado: &AdoConnectionString) -> Result<PgConfig, SqlAccessError> {
    let mut config = PgConfig::new();

    let host = ado
        .get(&["host", "server", "data source"])
        .ok_or_else(|| SqlAccessError::ConfigError("connection string has no Host".into()))?;
    for entry in host.split(',') {
        let (name, port) = split_host_port(entry)?;
        config.host(&name);
        if let Some(port) = port {
            config.port(port);
        }
    }
    if let Some(port) = ado.get(&["port"]) {
        let port = port.trim().parse::<u16>().map_err(|_| {
            SqlAccessError::ConfigError(format!("invalid Port '{port}'"))
        })?;
        config.port(port);
    }
    if let Some(db) = ado.get(&["database", "initial catalog", "db"]) {
        config.dbname(db);
    }
    if let Some(user) = ado.get(&["username", "user id", "user", "uid", "user name"]) {
        config.user(user);
    }
    if let Some(password) = ado.get(&["password", "pwd"]) {
        config.password(password);
    }
    if let Some(app) = ado.get(&["application name"]) {
        config.application_name(app);
    }
    if let Some(timeout) = ado.get_seconds(&["timeout", "connect timeout"])? {
        config.connect_timeout(timeout);
    }
    if let Some(command) = ado.get_seconds(&["command timeout"])? {
        config.options(format!("-c statement_timeout={}", command.as_millis()));
    }
    if let Some(mode) = ado.get(&["ssl mode", "sslmode"]) {
        let mode = match mode.trim().to_ascii_lowercase().as_str() {
            "disable" => SslMode::Disable,
            "prefer" | "allow" => SslMode::Prefer,
            "require" | "verifyca" | "verify-ca" | "verifyfull" | "verify-full" => {
                SslMode::Require
            }
            other => {
                return Err(SqlAccessError::ConfigError(format!(
                    "unknown SSL Mode '{other}'"
                )));
            }
        };
        config.ssl_mode(mode);
    }
    Ok(config)
}
