use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::{Command, CommandRequest, ExecMode, RawOutcome};
use crate::error::SqlAccessError;
use crate::reader::RowSink;
use crate::types::{CommandKind, IsolationLevel, ProviderIdentity};

#[cfg(feature = "mssql")]
use crate::mssql::{MssqlClient, MssqlSettings};
#[cfg(feature = "mysql")]
use crate::mysql::MysqlSettings;
#[cfg(feature = "postgres")]
use crate::postgres::{PgConnection, PostgresSettings};
#[cfg(feature = "mysql")]
use sqlx::mysql::MySqlConnection;

/// Parsed settings a connection is opened from.
#[derive(Debug, Clone)]
pub(crate) enum ConnectTarget {
    #[cfg(feature = "mssql")]
    SqlServer(Arc<MssqlSettings>),
    #[cfg(feature = "postgres")]
    Postgres(Arc<PostgresSettings>),
    #[cfg(feature = "mysql")]
    MySql(Arc<MysqlSettings>),
}

enum NativeConnection {
    #[cfg(feature = "mssql")]
    SqlServer(MssqlClient),
    #[cfg(feature = "postgres")]
    Postgres(PgConnection),
    #[cfg(feature = "mysql")]
    MySql(MySqlConnection),
}

enum State {
    Unopened,
    Open(NativeConnection),
    Closed,
}

/// Observable lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unopened,
    Open,
    Closed,
}

/// One physical connection, owned by a single call.
///
/// Moves `Unopened -> Open -> Closed`. A closed connection may be opened again. Dropping
/// an open connection releases the native handle without the graceful shutdown
/// [`close`](Connection::close) performs.
pub struct Connection {
    provider: ProviderIdentity,
    target: ConnectTarget,
    state: State,
    in_transaction: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("provider", &self.provider)
            .field("status", &self.status())
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(provider: ProviderIdentity, target: ConnectTarget) -> Self {
        Self {
            provider,
            target,
            state: State::Unopened,
            in_transaction: false,
        }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderIdentity {
        self.provider
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        match self.state {
            State::Unopened => ConnectionStatus::Unopened,
            State::Open(_) => ConnectionStatus::Open,
            State::Closed => ConnectionStatus::Closed,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Open the connection. Opening an open connection does nothing.
    ///
    /// # Errors
    /// Returns the driver error, or `ConnectionError` when the connect timeout expires.
    pub async fn open(&mut self) -> Result<(), SqlAccessError> {
        if self.is_open() {
            return Ok(());
        }
        let native = match &self.target {
            #[cfg(feature = "mssql")]
            ConnectTarget::SqlServer(settings) => {
                NativeConnection::SqlServer(settings.connect().await?)
            }
            #[cfg(feature = "postgres")]
            ConnectTarget::Postgres(settings) => {
                NativeConnection::Postgres(settings.connect().await?)
            }
            #[cfg(feature = "mysql")]
            ConnectTarget::MySql(settings) => NativeConnection::MySql(settings.connect().await?),
            #[allow(unreachable_patterns)]
            _ => {
                return Err(SqlAccessError::Unimplemented(format!(
                    "{} support is not compiled in",
                    self.provider
                )));
            }
        };
        self.state = State::Open(native);
        self.in_transaction = false;
        debug!(provider = %self.provider, "connection opened");
        Ok(())
    }

    /// Close the connection, rolling back an unfinished transaction first.
    ///
    /// Idempotent and infallible: failures while shutting down are logged and the
    /// connection ends up `Closed` regardless.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, State::Closed);
        let State::Open(mut native) = previous else {
            return;
        };
        if self.in_transaction {
            self.in_transaction = false;
            if let Err(e) = rollback(&mut native).await {
                warn!(provider = %self.provider, error = %e, "rollback on close failed");
            }
        }
        match native {
            #[cfg(feature = "mssql")]
            NativeConnection::SqlServer(client) => {
                if let Err(e) = client.close().await {
                    warn!(provider = %self.provider, error = %e, "closing connection failed");
                }
            }
            #[cfg(feature = "postgres")]
            NativeConnection::Postgres(conn) => conn.close().await,
            #[cfg(feature = "mysql")]
            NativeConnection::MySql(conn) => {
                if let Err(e) = sqlx::Connection::close(conn).await {
                    warn!(provider = %self.provider, error = %e, "closing connection failed");
                }
            }
            #[allow(unreachable_patterns)]
            _ => {}
        }
        debug!(provider = %self.provider, "connection closed");
    }

    /// Drop the native handle without a graceful shutdown, for sessions left mid-command.
    pub(crate) fn discard(&mut self) {
        if let State::Open(_) = std::mem::replace(&mut self.state, State::Closed) {
            debug!(provider = %self.provider, "connection discarded");
        }
        self.in_transaction = false;
    }

    /// Bind a command to this connection. Nothing is sent until it executes.
    pub fn create_command(&mut self, text: impl Into<String>, kind: CommandKind) -> Command<'_> {
        Command::new(self, text, kind)
    }

    /// Start a transaction; commands created from the guard run inside it.
    ///
    /// # Errors
    /// - `ConnectionError` when the connection is not open or a transaction is already active.
    /// - The driver error when the server rejects the `BEGIN`.
    pub async fn begin_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Transaction<'_>, SqlAccessError> {
        if self.in_transaction {
            return Err(SqlAccessError::ConnectionError(
                "a transaction is already active on this connection".into(),
            ));
        }
        let native = self.native()?;
        match native {
            #[cfg(feature = "mssql")]
            NativeConnection::SqlServer(client) => {
                crate::mssql::transaction::begin(client, isolation).await?;
            }
            #[cfg(feature = "postgres")]
            NativeConnection::Postgres(conn) => {
                crate::postgres::transaction::begin(&conn.client, isolation).await?;
            }
            #[cfg(feature = "mysql")]
            NativeConnection::MySql(conn) => {
                crate::mysql::transaction::begin(conn, isolation).await?;
            }
            #[allow(unreachable_patterns)]
            _ => {}
        }
        self.in_transaction = true;
        debug!(provider = %self.provider, ?isolation, "transaction started");
        Ok(Transaction {
            conn: self,
            finished: false,
        })
    }

    async fn end_transaction(&mut self, commit: bool) -> Result<(), SqlAccessError> {
        let native = self.native()?;
        if commit {
            match native {
                #[cfg(feature = "mssql")]
                NativeConnection::SqlServer(client) => {
                    crate::mssql::transaction::commit(client).await?;
                }
                #[cfg(feature = "postgres")]
                NativeConnection::Postgres(conn) => {
                    crate::postgres::transaction::commit(&conn.client).await?;
                }
                #[cfg(feature = "mysql")]
                NativeConnection::MySql(conn) => crate::mysql::transaction::commit(conn).await?,
                #[allow(unreachable_patterns)]
                _ => {}
            }
        } else {
            rollback(native).await?;
        }
        self.in_transaction = false;
        let outcome = if commit { "committed" } else { "rolled back" };
        debug!(provider = %self.provider, outcome, "transaction finished");
        Ok(())
    }

    fn native(&mut self) -> Result<&mut NativeConnection, SqlAccessError> {
        match &mut self.state {
            State::Open(native) => Ok(native),
            State::Unopened => Err(SqlAccessError::ConnectionError(
                "connection has not been opened".into(),
            )),
            State::Closed => Err(SqlAccessError::ConnectionError(
                "connection is closed".into(),
            )),
        }
    }

    pub(crate) async fn run(
        &mut self,
        req: &CommandRequest<'_>,
        mode: ExecMode,
    ) -> Result<RawOutcome, SqlAccessError> {
        match self.native()? {
            #[cfg(feature = "mssql")]
            NativeConnection::SqlServer(client) => crate::mssql::query::run(client, req, mode).await,
            #[cfg(feature = "postgres")]
            NativeConnection::Postgres(conn) => {
                crate::postgres::query::run(&conn.client, req, mode).await
            }
            #[cfg(feature = "mysql")]
            NativeConnection::MySql(conn) => crate::mysql::query::run(conn, req, mode).await,
            #[allow(unreachable_patterns)]
            _ => Err(SqlAccessError::Unimplemented(format!(
                "{} support is not compiled in",
                self.provider
            ))),
        }
    }

    pub(crate) async fn stream(
        &mut self,
        req: &CommandRequest<'_>,
        sink: &mut RowSink,
    ) -> Result<(), SqlAccessError> {
        match self.native()? {
            #[cfg(feature = "mssql")]
            NativeConnection::SqlServer(client) => {
                crate::mssql::query::stream(client, req, sink).await
            }
            #[cfg(feature = "postgres")]
            NativeConnection::Postgres(conn) => {
                crate::postgres::query::stream(&conn.client, req, sink).await
            }
            #[cfg(feature = "mysql")]
            NativeConnection::MySql(conn) => crate::mysql::query::stream(conn, req, sink).await,
            #[allow(unreachable_patterns)]
            _ => Err(SqlAccessError::Unimplemented(format!(
                "{} support is not compiled in",
                self.provider
            ))),
        }
    }
}

async fn rollback(native: &mut NativeConnection) -> Result<(), SqlAccessError> {
    match native {
        #[cfg(feature = "mssql")]
        NativeConnection::SqlServer(client) => crate::mssql::transaction::rollback(client).await,
        #[cfg(feature = "postgres")]
        NativeConnection::Postgres(conn) => {
            crate::postgres::transaction::rollback(&conn.client).await
        }
        #[cfg(feature = "mysql")]
        NativeConnection::MySql(conn) => crate::mysql::transaction::rollback(conn).await,
        #[allow(unreachable_patterns)]
        _ => Ok(()),
    }
}

/// An active transaction on one connection.
///
/// Finish it with [`commit`](Transaction::commit) or [`rollback`](Transaction::rollback).
/// A guard dropped unfinished leaves the transaction open until the connection closes,
/// which rolls it back.
#[derive(Debug)]
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    finished: bool,
}

impl Transaction<'_> {
    /// Create a command that runs inside this transaction.
    pub fn command(&mut self, text: impl Into<String>, kind: CommandKind) -> Command<'_> {
        self.conn.create_command(text, kind)
    }

    #[must_use]
    pub fn provider(&self) -> ProviderIdentity {
        self.conn.provider()
    }

    /// # Errors
    /// Returns the driver error when the commit fails; the transaction is then still
    /// open and is rolled back when the connection closes.
    pub async fn commit(mut self) -> Result<(), SqlAccessError> {
        self.finished = true;
        self.conn.end_transaction(true).await
    }

    /// A connection discarded after a timeout has no session left to roll back; the
    /// server aborts the transaction with the session and this returns `Ok`.
    ///
    /// # Errors
    /// Returns the driver error when the rollback fails.
    pub async fn rollback(mut self) -> Result<(), SqlAccessError> {
        self.finished = true;
        if !self.conn.is_open() {
            debug!(provider = %self.conn.provider, "transaction ended with its session");
            return Ok(());
        }
        self.conn.end_transaction(false).await
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && self.conn.in_transaction {
            warn!(
                provider = %self.conn.provider,
                "transaction dropped without commit or rollback; it ends when the connection closes"
            );
        }
    }
}

#[cfg(all(test, feature = "postgres"))]
mod tests {
    use super::*;

    fn unopened() -> Connection {
        let settings = PostgresSettings::parse("host=localhost user=app dbname=app").unwrap();
        Connection::new(
            ProviderIdentity::PostgreSql,
            ConnectTarget::Postgres(Arc::new(settings)),
        )
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut conn = unopened();
        assert_eq!(conn.status(), ConnectionStatus::Unopened);
        conn.close().await;
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        conn.close().await;
        assert_eq!(conn.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn commands_need_an_open_connection() {
        let mut conn = unopened();
        let err = conn
            .create_command("SELECT 1", CommandKind::Text)
            .execute_scalar()
            .await
            .unwrap_err();
        assert!(matches!(err, SqlAccessError::ConnectionError(_)));
        let err = conn.begin_transaction(None).await.unwrap_err();
        assert!(matches!(err, SqlAccessError::ConnectionError(_)));
    }

    #[test]
    fn discard_leaves_connection_closed() {
        let mut conn = unopened();
        conn.discard();
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        assert!(!conn.in_transaction());
    }
}
