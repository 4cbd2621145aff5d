//! The application-facing façade.
//!
//! Every operation opens its own connection, runs one command (or one transaction) and
//! closes the connection again before returning. The exception is
//! [`AccessManager::get_reader`], whose reader takes the connection with it.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::adapter::{BackendAdapter, DataAccess};
use crate::command::{Command, CommandSpec};
use crate::config::{ConfigSource, ConnectionConfig};
use crate::connection::{Connection, Transaction};
use crate::db_types::TypeTag;
use crate::error::SqlAccessError;
use crate::factory::ProviderFactory;
use crate::mapper::{RowMapper, SerdeRowMapper};
use crate::params::{Parameter, ParameterBuilder};
use crate::reader::StreamingReader;
use crate::results::{DataSet, ExecuteOutcome, ResultSet};
use crate::types::{CommandKind, IsolationLevel, ParameterDirection, ProviderIdentity, RowValues};

/// Defaults applied to commands that do not set their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Used when [`CommandSpec::timeout`] is `None`; `None` waits indefinitely.
    pub default_timeout: Option<Duration>,
}

/// Provider-agnostic access to one configured database.
///
/// Cheap to clone; clones share the resolved configuration and adapter. Concurrent
/// calls never share a connection.
///
/// ```rust,no_run
/// use sql_access_layer::prelude::*;
///
/// # async fn demo() -> Result<(), SqlAccessError> {
/// let settings = AppSettings::load("appsettings.json")?;
/// let db = AccessManager::new("Main", &settings)?;
///
/// let id = db
///     .insert_returning_i64(
///         CommandSpec::text("INSERT INTO orders (customer) OUTPUT INSERTED.id VALUES (@customer)")
///             .param("@customer", "ACME"),
///     )
///     .await?;
/// let total: Option<f64> = db
///     .query_single(CommandSpec::text("SELECT total FROM orders WHERE id = @id").param("@id", id))
///     .await?;
/// # let _ = total;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AccessManager<M = SerdeRowMapper> {
    config: Arc<ConnectionConfig>,
    adapter: Arc<BackendAdapter>,
    mapper: M,
    options: ManagerOptions,
}

impl AccessManager<SerdeRowMapper> {
    /// Resolve `name` through `source`. No connection is opened.
    ///
    /// # Errors
    /// See [`ProviderFactory::resolve`].
    pub fn new(name: &str, source: &dyn ConfigSource) -> Result<Self, SqlAccessError> {
        Self::from_config(ProviderFactory::load(name, source)?)
    }

    /// Use an already resolved configuration.
    ///
    /// # Errors
    /// `ConfigError` when the connection string cannot be parsed.
    pub fn from_config(config: ConnectionConfig) -> Result<Self, SqlAccessError> {
        let adapter = ProviderFactory::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            adapter: Arc::new(adapter),
            mapper: SerdeRowMapper,
            options: ManagerOptions::default(),
        })
    }
}

impl<M: RowMapper> AccessManager<M> {
    /// Replace the row mapper used by the `query*` operations.
    pub fn with_mapper<N: RowMapper>(self, mapper: N) -> AccessManager<N> {
        AccessManager {
            config: self.config,
            adapter: self.adapter,
            mapper,
            options: self.options,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn provider(&self) -> ProviderIdentity {
        self.config.provider
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn adapter(&self) -> &BackendAdapter {
        &self.adapter
    }

    #[must_use]
    pub fn options(&self) -> ManagerOptions {
        self.options
    }

    /// Builder for parameters bound to this manager's provider.
    #[must_use]
    pub fn parameter_builder(&self) -> ParameterBuilder {
        ParameterBuilder::new(self.provider())
    }

    /// The first result set of the command; empty when it returned none.
    ///
    /// # Errors
    /// Parameter, connection and execution errors.
    pub async fn get_table(&self, spec: CommandSpec) -> Result<ResultSet, SqlAccessError> {
        Ok(self
            .fetch(&spec, spec.kind)
            .await?
            .into_first()
            .unwrap_or_default())
    }

    /// Every result set of the command, with its output parameters.
    ///
    /// # Errors
    /// Parameter, connection and execution errors.
    pub async fn get_result_sets(&self, spec: CommandSpec) -> Result<DataSet, SqlAccessError> {
        self.fetch(&spec, spec.kind).await
    }

    /// Stream the first result set row by row.
    ///
    /// The reader owns its connection and closes it when the rows run out or the reader
    /// is closed or dropped. [`CommandSpec::timeout`] does not apply to streaming.
    ///
    /// # Errors
    /// Parameter, connection and execution errors raised before the first row.
    pub async fn get_reader(&self, spec: CommandSpec) -> Result<StreamingReader, SqlAccessError> {
        let params = self.prepare(&spec)?;
        debug!(provider = %self.provider(), kind = ?spec.kind, "opening streaming reader");
        StreamingReader::open(self.adapter.open_connection(), spec.text, spec.kind, params).await
    }

    /// First column of the first row.
    ///
    /// `Ok(None)` when no row came back; a SQL `NULL` is `Some(RowValues::Null)`.
    ///
    /// # Errors
    /// Parameter, connection and execution errors.
    pub async fn get_scalar(&self, spec: CommandSpec) -> Result<Option<RowValues>, SqlAccessError> {
        let params = self.prepare(&spec)?;
        let mut scope = ConnectionScope::open(&self.adapter).await?;
        let result = async {
            let mut command = self.bind(scope.conn(), &spec, spec.kind, params)?;
            command.execute_scalar().await
        }
        .await;
        scope.finish().await;
        result
    }

    /// Every row of the first result set, decoded by the mapper.
    ///
    /// # Errors
    /// As [`get_table`](Self::get_table), plus `DecodeError` for a row that does not map.
    pub async fn query<T: DeserializeOwned>(
        &self,
        spec: CommandSpec,
    ) -> Result<Vec<T>, SqlAccessError> {
        let table = self.get_table(spec).await?;
        self.map_all(&table)
    }

    /// The first row, decoded; `None` when there is none.
    ///
    /// Further rows are ignored rather than reported.
    ///
    /// # Errors
    /// As [`query`](Self::query).
    pub async fn query_single<T: DeserializeOwned>(
        &self,
        spec: CommandSpec,
    ) -> Result<Option<T>, SqlAccessError> {
        let table = self.get_table(spec).await?;
        self.map_first(&table)
    }

    /// [`query`](Self::query) for a stored procedure named by `spec.text`.
    ///
    /// # Errors
    /// As [`query`](Self::query).
    pub async fn query_stored_procedure<T: DeserializeOwned>(
        &self,
        spec: CommandSpec,
    ) -> Result<Vec<T>, SqlAccessError> {
        let data = self.fetch(&spec, CommandKind::StoredProcedure).await?;
        self.map_all(&data.into_first().unwrap_or_default())
    }

    /// # Errors
    /// As [`query_single`](Self::query_single).
    pub async fn query_single_stored_procedure<T: DeserializeOwned>(
        &self,
        spec: CommandSpec,
    ) -> Result<Option<T>, SqlAccessError> {
        let data = self.fetch(&spec, CommandKind::StoredProcedure).await?;
        self.map_first(&data.into_first().unwrap_or_default())
    }

    /// # Errors
    /// Parameter, connection and execution errors.
    pub async fn insert(&self, spec: CommandSpec) -> Result<ExecuteOutcome, SqlAccessError> {
        self.exec(&spec, spec.kind).await
    }

    /// # Errors
    /// Parameter, connection and execution errors.
    pub async fn update(&self, spec: CommandSpec) -> Result<ExecuteOutcome, SqlAccessError> {
        self.exec(&spec, spec.kind).await
    }

    /// # Errors
    /// Parameter, connection and execution errors.
    pub async fn delete(&self, spec: CommandSpec) -> Result<ExecuteOutcome, SqlAccessError> {
        self.exec(&spec, spec.kind).await
    }

    /// Rows affected by the command.
    ///
    /// # Errors
    /// Parameter, connection and execution errors.
    pub async fn execute(&self, spec: CommandSpec) -> Result<u64, SqlAccessError> {
        Ok(self.exec(&spec, spec.kind).await?.rows_affected)
    }

    /// # Errors
    /// Parameter, connection and execution errors.
    pub async fn execute_stored_procedure(
        &self,
        spec: CommandSpec,
    ) -> Result<ExecuteOutcome, SqlAccessError> {
        self.exec(&spec, CommandKind::StoredProcedure).await
    }

    /// Run an insert and return the identity it generated.
    ///
    /// The value is the first column of the first row the command returned
    /// (`OUTPUT INSERTED.id`, `RETURNING id`), falling back to the backend's session
    /// identity (`SCOPE_IDENTITY()`, `lastval()`, `LAST_INSERT_ID()`).
    ///
    /// # Errors
    /// Parameter, connection and execution errors; `DecodeError` when the identity is
    /// missing, `NULL`, not integral or out of range.
    pub async fn insert_returning_i64(&self, spec: CommandSpec) -> Result<i64, SqlAccessError> {
        decode_identity(self.identity(&spec).await?)
    }

    /// # Errors
    /// As [`insert_returning_i64`](Self::insert_returning_i64).
    pub async fn insert_returning_i32(&self, spec: CommandSpec) -> Result<i32, SqlAccessError> {
        decode_identity(self.identity(&spec).await?)
    }

    /// Run the insert inside a transaction at `spec.isolation`.
    ///
    /// # Errors
    /// The command's error after a successful rollback, or `RollbackFailure` when the
    /// rollback fails too.
    pub async fn insert_with_transaction(
        &self,
        spec: CommandSpec,
    ) -> Result<ExecuteOutcome, SqlAccessError> {
        self.exec_in_transaction(&spec, spec.kind).await
    }

    /// # Errors
    /// As [`insert_with_transaction`](Self::insert_with_transaction).
    pub async fn update_with_transaction(
        &self,
        spec: CommandSpec,
    ) -> Result<ExecuteOutcome, SqlAccessError> {
        self.exec_in_transaction(&spec, spec.kind).await
    }

    /// Rows affected, with the command run inside a transaction.
    ///
    /// # Errors
    /// As [`insert_with_transaction`](Self::insert_with_transaction).
    pub async fn execute_with_transaction(&self, spec: CommandSpec) -> Result<u64, SqlAccessError> {
        Ok(self.exec_in_transaction(&spec, spec.kind).await?.rows_affected)
    }

    /// # Errors
    /// As [`insert_with_transaction`](Self::insert_with_transaction).
    pub async fn execute_stored_procedure_with_transaction(
        &self,
        spec: CommandSpec,
    ) -> Result<ExecuteOutcome, SqlAccessError> {
        self.exec_in_transaction(&spec, CommandKind::StoredProcedure)
            .await
    }

    /// Run several commands in one transaction: all of them commit or none does.
    ///
    /// The per-command `isolation` fields are ignored; `isolation` applies to the whole
    /// transaction.
    ///
    /// # Errors
    /// As [`insert_with_transaction`](Self::insert_with_transaction). Parameters of every
    /// command are checked before the connection is opened.
    pub async fn execute_all_with_transaction(
        &self,
        specs: &[CommandSpec],
        isolation: Option<IsolationLevel>,
    ) -> Result<Vec<ExecuteOutcome>, SqlAccessError> {
        let steps = specs
            .iter()
            .map(|spec| self.prepare(spec).map(|params| (spec, spec.kind, params)))
            .collect::<Result<Vec<_>, _>>()?;
        let mut scope = ConnectionScope::open(&self.adapter).await?;
        let result = self.transact(scope.conn(), steps, isolation).await;
        scope.finish().await;
        result
    }

    /// An open connection for callers that drive commands themselves.
    ///
    /// The caller owns it and should hand it back to
    /// [`close_connection`](Self::close_connection).
    ///
    /// # Errors
    /// Driver or timeout errors while connecting.
    pub async fn open_connection(&self) -> Result<Connection, SqlAccessError> {
        let mut conn = self.adapter.open_connection();
        conn.open().await?;
        Ok(conn)
    }

    /// Idempotent; never fails.
    pub async fn close_connection(&self, conn: &mut Connection) {
        self.adapter.close_connection(conn).await;
    }

    /// # Errors
    /// See [`ParameterBuilder::build`].
    pub fn create_parameter(
        &self,
        name: &str,
        value: impl Into<RowValues>,
        type_tag: impl Into<TypeTag>,
        direction: ParameterDirection,
    ) -> Result<Parameter, SqlAccessError> {
        self.adapter
            .create_parameter(name, value.into(), type_tag.into(), direction)
    }

    /// Parameter whose type is inferred from the value.
    ///
    /// # Errors
    /// See [`ParameterBuilder::build`].
    pub fn create_input_parameter(
        &self,
        name: &str,
        value: impl Into<RowValues>,
    ) -> Result<Parameter, SqlAccessError> {
        self.parameter_builder()
            .value_only(name, value, ParameterDirection::Input)
    }

    /// Output parameter of the given type.
    ///
    /// # Errors
    /// See [`ParameterBuilder::build`].
    pub fn create_output_parameter(
        &self,
        name: &str,
        type_tag: impl Into<TypeTag>,
    ) -> Result<Parameter, SqlAccessError> {
        self.parameter_builder()
            .typed_only(name, type_tag, ParameterDirection::Output)
    }

    fn prepare(&self, spec: &CommandSpec) -> Result<Vec<Parameter>, SqlAccessError> {
        self.parameter_builder().build_all(&spec.parameters)
    }

    fn bind<'c>(
        &self,
        conn: &'c mut Connection,
        spec: &CommandSpec,
        kind: CommandKind,
        params: Vec<Parameter>,
    ) -> Result<Command<'c>, SqlAccessError> {
        let mut command = self.adapter.create_command(&spec.text, kind, conn)?;
        command.add_parameters(params)?;
        command.set_timeout(spec.timeout.or(self.options.default_timeout));
        Ok(command)
    }

    async fn fetch(&self, spec: &CommandSpec, kind: CommandKind) -> Result<DataSet, SqlAccessError> {
        let params = self.prepare(spec)?;
        let mut scope = ConnectionScope::open(&self.adapter).await?;
        let result = async {
            let command = self.bind(scope.conn(), spec, kind, params)?;
            self.adapter.create_adapter(command).fill().await
        }
        .await;
        scope.finish().await;
        result
    }

    async fn exec(
        &self,
        spec: &CommandSpec,
        kind: CommandKind,
    ) -> Result<ExecuteOutcome, SqlAccessError> {
        let params = self.prepare(spec)?;
        let mut scope = ConnectionScope::open(&self.adapter).await?;
        let result = async {
            let mut command = self.bind(scope.conn(), spec, kind, params)?;
            command.execute_non_query().await
        }
        .await;
        scope.finish().await;
        result
    }

    async fn identity(&self, spec: &CommandSpec) -> Result<Option<RowValues>, SqlAccessError> {
        let params = self.prepare(spec)?;
        let mut scope = ConnectionScope::open(&self.adapter).await?;
        let result = async {
            let mut command = self.bind(scope.conn(), spec, spec.kind, params)?;
            command.execute_identity().await
        }
        .await;
        scope.finish().await;
        result
    }

    async fn exec_in_transaction(
        &self,
        spec: &CommandSpec,
        kind: CommandKind,
    ) -> Result<ExecuteOutcome, SqlAccessError> {
        let params = self.prepare(spec)?;
        let mut scope = ConnectionScope::open(&self.adapter).await?;
        let result = self
            .transact(scope.conn(), vec![(spec, kind, params)], spec.isolation)
            .await;
        scope.finish().await;
        let mut outcomes = result?;
        outcomes.pop().ok_or_else(|| {
            SqlAccessError::ExecutionError("transaction produced no outcome".into())
        })
    }

    async fn transact(
        &self,
        conn: &mut Connection,
        steps: Vec<(&CommandSpec, CommandKind, Vec<Parameter>)>,
        isolation: Option<IsolationLevel>,
    ) -> Result<Vec<ExecuteOutcome>, SqlAccessError> {
        let mut tx = conn.begin_transaction(isolation).await?;
        let mut outcomes = Vec::with_capacity(steps.len());
        for (spec, kind, params) in steps {
            let step = async {
                let mut command = tx.command(spec.text.as_str(), kind);
                command.add_parameters(params)?;
                command.set_timeout(spec.timeout.or(self.options.default_timeout));
                command.execute_non_query().await
            }
            .await;
            match step {
                Ok(outcome) => outcomes.push(outcome),
                Err(original) => return Err(abort(tx, original).await),
            }
        }
        tx.commit().await?;
        Ok(outcomes)
    }

    fn map_all<T: DeserializeOwned>(&self, table: &ResultSet) -> Result<Vec<T>, SqlAccessError> {
        table
            .results
            .iter()
            .map(|row| self.mapper.map_row(row))
            .collect()
    }

    fn map_first<T: DeserializeOwned>(
        &self,
        table: &ResultSet,
    ) -> Result<Option<T>, SqlAccessError> {
        table
            .results
            .first()
            .map(|row| self.mapper.map_row(row))
            .transpose()
    }
}

/// Roll back after `original` and report what the caller should see.
async fn abort(tx: Transaction<'_>, original: SqlAccessError) -> SqlAccessError {
    let provider = tx.provider();
    let rolled_back = tx.rollback().await;
    match &rolled_back {
        Ok(()) => warn!(%provider, error = %original, "transaction rolled back"),
        Err(rollback) => error!(
            %provider,
            error = %original,
            rollback_error = %rollback,
            "rollback failed after command error"
        ),
    }
    rollback_outcome(original, rolled_back)
}

/// The original error when the rollback succeeded; both otherwise.
pub(crate) fn rollback_outcome(
    original: SqlAccessError,
    rolled_back: Result<(), SqlAccessError>,
) -> SqlAccessError {
    match rolled_back {
        Ok(()) => original,
        Err(rollback) => SqlAccessError::RollbackFailure {
            original: Box::new(original),
            rollback: Box::new(rollback),
        },
    }
}

/// Read an identity value as an integer of the caller's width.
///
/// # Errors
/// `DecodeError` when the value is missing, `NULL`, not integral or does not fit `T`.
pub(crate) fn decode_identity<T: TryFrom<i64>>(value: Option<RowValues>) -> Result<T, SqlAccessError> {
    let raw = match value {
        None => {
            return Err(SqlAccessError::DecodeError(
                "the insert did not produce an identity value".into(),
            ));
        }
        Some(RowValues::Null) => {
            return Err(SqlAccessError::DecodeError("identity value is NULL".into()));
        }
        Some(RowValues::Int(i)) => i,
        Some(RowValues::Float(f)) if f.is_finite() && f.fract() == 0.0 => {
            integral_float(f)?
        }
        Some(RowValues::Text(s)) => integral_text(&s)?,
        Some(other) => {
            return Err(SqlAccessError::DecodeError(format!(
                "identity value {other:?} is not an integer"
            )));
        }
    };
    T::try_from(raw).map_err(|_| {
        SqlAccessError::DecodeError(format!(
            "identity value {raw} is out of range for {}",
            std::any::type_name::<T>()
        ))
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral_float(f: f64) -> Result<i64, SqlAccessError> {
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(SqlAccessError::DecodeError(format!(
            "identity value {f} is out of range for i64"
        )));
    }
    Ok(f as i64)
}

/// `42`, or a numeric rendering with only zero decimals such as `42.000`.
fn integral_text(s: &str) -> Result<i64, SqlAccessError> {
    let trimmed = s.trim();
    let digits = match trimmed.split_once('.') {
        Some((whole, frac)) if frac.bytes().all(|b| b == b'0') => whole,
        _ => trimmed,
    };
    digits.parse::<i64>().map_err(|_| {
        SqlAccessError::DecodeError(format!("identity value '{s}' is not an integer"))
    })
}

/// One manager call's connection.
///
/// [`finish`](Self::finish) closes it gracefully. Dropping an unfinished scope (an early
/// return or a cancelled future) releases the native handle without the shutdown
/// handshake, which also ends any open transaction on the server.
struct ConnectionScope {
    conn: Connection,
    finished: bool,
}

impl ConnectionScope {
    async fn open(adapter: &BackendAdapter) -> Result<Self, SqlAccessError> {
        let mut conn = adapter.open_connection();
        conn.open().await?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    fn conn(&mut self) -> &mut Connection {
        &mut self.conn
    }

    async fn finish(mut self) {
        self.finished = true;
        self.conn.close().await;
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if !self.finished && self.conn.is_open() {
            debug!(provider = %self.conn.provider(), "connection released without close");
        }
    }
}
