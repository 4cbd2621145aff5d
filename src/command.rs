use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::SqlAccessError;
use crate::params::{IntoParams, Parameter, ParameterSpec, check_unique};
use crate::results::{DataSet, ExecuteOutcome, OutputValues, ResultSet};
use crate::types::{CommandKind, IsolationLevel, RowValues};

/// Everything a caller says about one command before it is bound to a provider.
///
/// ```rust
/// use std::time::Duration;
/// use sql_access_layer::prelude::*;
///
/// let spec = CommandSpec::stored_procedure("sales.CloseOrder")
///     .param("@order_id", 42_i64)
///     .bind(ParameterSpec::output("@closed_at", DbType::DateTime))
///     .isolation(IsolationLevel::Serializable)
///     .timeout(Duration::from_secs(30));
/// assert_eq!(spec.parameters.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub text: String,
    pub kind: CommandKind,
    pub parameters: Vec<ParameterSpec>,
    /// Isolation level for the transactional operations; `None` keeps the server default.
    pub isolation: Option<IsolationLevel>,
    /// Limit on execution time; `None` falls back to the manager's default.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn text(sql: impl Into<String>) -> Self {
        Self::new(sql, CommandKind::Text)
    }

    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self::new(name, CommandKind::StoredProcedure)
    }

    pub fn table(name: impl Into<String>) -> Self {
        Self::new(name, CommandKind::TableDirect)
    }

    /// Add an input parameter whose type is inferred from the value.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.parameters.push(ParameterSpec::new(name, value));
        self
    }

    #[must_use]
    pub fn bind(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    #[must_use]
    pub fn params(mut self, specs: impl IntoIterator<Item = ParameterSpec>) -> Self {
        self.parameters.extend(specs);
        self
    }

    /// Add parameters from an ORM-style parameter object.
    ///
    /// # Errors
    /// Whatever [`IntoParams::into_params`] reports.
    pub fn try_params(mut self, params: impl IntoParams) -> Result<Self, SqlAccessError> {
        self.parameters.extend(params.into_params()?);
        Ok(self)
    }

    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Borrowed view of a bound command, handed to the backend modules.
#[derive(Debug)]
pub(crate) struct CommandRequest<'a> {
    pub(crate) text: &'a str,
    pub(crate) kind: CommandKind,
    pub(crate) params: &'a [Parameter],
}

/// What the caller needs back from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecMode {
    NonQuery,
    Query,
    /// Like `NonQuery`, plus the identity generated by the statement.
    Identity,
}

/// Everything a backend collected while running one command.
#[derive(Debug, Default)]
pub(crate) struct RawOutcome {
    pub(crate) result_sets: Vec<ResultSet>,
    pub(crate) rows_affected: u64,
    pub(crate) outputs: OutputValues,
    pub(crate) identity: Option<RowValues>,
}

/// A command bound to an open connection.
///
/// Created by [`Connection::create_command`] or
/// [`Transaction::command`](crate::connection::Transaction::command). Parameters are
/// attached before execution; output values are only available from the execution
/// result.
pub struct Command<'c> {
    conn: &'c mut Connection,
    text: String,
    kind: CommandKind,
    params: Vec<Parameter>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("provider", &self.conn.provider())
            .field("kind", &self.kind)
            .field("parameters", &self.params.len())
            .finish_non_exhaustive()
    }
}

impl<'c> Command<'c> {
    pub(crate) fn new(conn: &'c mut Connection, text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            conn,
            text: text.into(),
            kind,
            params: Vec::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Attach a parameter.
    ///
    /// # Errors
    /// - `UnsupportedProvider` when the parameter was built for another provider.
    /// - `ParameterError` when the name is already taken or a second return value is added.
    pub fn add_parameter(&mut self, param: Parameter) -> Result<(), SqlAccessError> {
        let provider = self.conn.provider();
        if param.provider() != provider {
            return Err(SqlAccessError::UnsupportedProvider {
                provider: provider.provider_name().to_string(),
                requested: Some(format!(
                    "{} (parameter '{}' was built for {})",
                    param.type_tag(),
                    param.name(),
                    param.provider()
                )),
            });
        }
        let mut candidate = self.params.clone();
        candidate.push(param);
        check_unique(&candidate)?;
        self.params = candidate;
        Ok(())
    }

    /// # Errors
    /// See [`add_parameter`](Self::add_parameter); parameters before the failing one stay attached.
    pub fn add_parameters(
        &mut self,
        params: impl IntoIterator<Item = Parameter>,
    ) -> Result<(), SqlAccessError> {
        for param in params {
            self.add_parameter(param)?;
        }
        Ok(())
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Run the command for its side effects.
    ///
    /// # Errors
    /// Returns the driver error, or `ExecutionError` on timeout.
    pub async fn execute_non_query(&mut self) -> Result<ExecuteOutcome, SqlAccessError> {
        let outcome = self.run(ExecMode::NonQuery).await?;
        Ok(ExecuteOutcome {
            rows_affected: outcome.rows_affected,
            outputs: outcome.outputs,
        })
    }

    /// Run the command and collect every result set.
    ///
    /// # Errors
    /// Returns the driver error, or `ExecutionError` on timeout. No partial data set is
    /// ever returned.
    pub async fn execute_query(&mut self) -> Result<DataSet, SqlAccessError> {
        let outcome = self.run(ExecMode::Query).await?;
        Ok(DataSet {
            result_sets: outcome.result_sets,
            outputs: outcome.outputs,
        })
    }

    /// First column of the first row.
    ///
    /// `Ok(None)` when the command returned no row; a SQL `NULL` is `Some(RowValues::Null)`.
    ///
    /// # Errors
    /// Returns the driver error, or `ExecutionError` on timeout.
    pub async fn execute_scalar(&mut self) -> Result<Option<RowValues>, SqlAccessError> {
        let outcome = self.run(ExecMode::Query).await?;
        Ok(outcome
            .result_sets
            .first()
            .and_then(ResultSet::first_value)
            .cloned())
    }

    /// Run an insert and return the value it generated: the first column the command
    /// itself returned (`OUTPUT INSERTED.id`, `RETURNING id`), otherwise the backend's
    /// session identity.
    pub(crate) async fn execute_identity(&mut self) -> Result<Option<RowValues>, SqlAccessError> {
        let outcome = self.run(ExecMode::Identity).await?;
        let returned = outcome
            .result_sets
            .iter()
            .find_map(ResultSet::first_value)
            .cloned();
        Ok(returned.or(outcome.identity))
    }

    async fn run(&mut self, mode: ExecMode) -> Result<RawOutcome, SqlAccessError> {
        let Command {
            conn,
            text,
            kind,
            params,
            timeout,
        } = self;
        let req = CommandRequest {
            text,
            kind: *kind,
            params,
        };
        debug!(
            provider = %conn.provider(),
            kind = ?req.kind,
            params = req.params.len(),
            ?mode,
            "executing command"
        );

        let Some(limit) = *timeout else {
            return conn.run(&req, mode).await;
        };
        match tokio::time::timeout(limit, conn.run(&req, mode)).await {
            Ok(result) => result,
            Err(_) => {
                // the session is mid-command; it cannot be reused
                warn!(
                    provider = %conn.provider(),
                    ?limit,
                    "command timed out; discarding connection"
                );
                conn.discard();
                Err(SqlAccessError::ExecutionError(format!(
                    "command timed out after {}ms",
                    limit.as_millis()
                )))
            }
        }
    }
}

/// Materializes everything a command returns in one go.
#[derive(Debug)]
pub struct BulkFiller<'c> {
    command: Command<'c>,
}

impl<'c> BulkFiller<'c> {
    #[must_use]
    pub fn new(command: Command<'c>) -> Self {
        Self { command }
    }

    /// # Errors
    /// Returns the first error; a partial data set is never returned.
    pub async fn fill(mut self) -> Result<DataSet, SqlAccessError> {
        self.command.execute_query().await
    }
}
