use thiserror::Error;

#[cfg(feature = "mssql")]
use tiberius;
#[cfg(feature = "postgres")]
use tokio_postgres;

/// Broad classification of [`SqlAccessError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid connection configuration.
    Configuration,
    /// Provider outside the supported set, or a type tag used against the wrong provider.
    UnsupportedProvider,
    /// A parameter value that cannot be bound as the requested type.
    Parameter,
    /// Failure while opening a connection or executing a command.
    Execution,
    /// A result value that cannot be converted to the requested type.
    Decode,
    /// A rollback failed after an execution error.
    RollbackFailure,
}

#[derive(Debug, Error)]
pub enum SqlAccessError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[cfg(feature = "mysql")]
    #[error(transparent)]
    MysqlError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{}", unsupported_message(.provider, .requested.as_deref()))]
    UnsupportedProvider {
        provider: String,
        requested: Option<String>,
    },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("{original} (rollback also failed: {rollback})")]
    RollbackFailure {
        original: Box<SqlAccessError>,
        rollback: Box<SqlAccessError>,
    },

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),
}

fn unsupported_message(provider: &str, requested: Option<&str>) -> String {
    match requested {
        Some(requested) => {
            format!("Provider '{provider}' is not supported for parameter type {requested}")
        }
        None => format!("Provider '{provider}' is not supported"),
    }
}

impl SqlAccessError {
    #[must_use]
    pub fn unsupported_provider(provider: impl Into<String>) -> Self {
        Self::UnsupportedProvider {
            provider: provider.into(),
            requested: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigError(_) => ErrorKind::Configuration,
            Self::UnsupportedProvider { .. } | Self::Unimplemented(_) => {
                ErrorKind::UnsupportedProvider
            }
            Self::ParameterError(_) => ErrorKind::Parameter,
            Self::DecodeError(_) => ErrorKind::Decode,
            Self::RollbackFailure { .. } => ErrorKind::RollbackFailure,
            Self::ConnectionError(_) | Self::ExecutionError(_) => ErrorKind::Execution,
            #[cfg(feature = "postgres")]
            Self::PostgresError(_) => ErrorKind::Execution,
            #[cfg(feature = "mssql")]
            Self::MssqlError(_) => ErrorKind::Execution,
            #[cfg(feature = "mysql")]
            Self::MysqlError(_) => ErrorKind::Execution,
        }
    }

    /// The error that started a failed transaction, looking through rollback failures.
    #[must_use]
    pub fn original(&self) -> &SqlAccessError {
        match self {
            Self::RollbackFailure { original, .. } => original.original(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_failure_keeps_original_first() {
        let err = SqlAccessError::RollbackFailure {
            original: Box::new(SqlAccessError::ExecutionError("duplicate key".into())),
            rollback: Box::new(SqlAccessError::ConnectionError("socket closed".into())),
        };
        let text = err.to_string();
        assert!(text.starts_with("SQL execution error: duplicate key"));
        assert!(text.contains("socket closed"));
        assert_eq!(err.kind(), ErrorKind::RollbackFailure);
        assert_eq!(err.original().kind(), ErrorKind::Execution);
    }

    #[test]
    fn unsupported_provider_names_requested_type() {
        let err = SqlAccessError::UnsupportedProvider {
            provider: "mysqlclient".into(),
            requested: Some("PostgresType::Jsonb".into()),
        };
        assert_eq!(
            err.to_string(),
            "Provider 'mysqlclient' is not supported for parameter type PostgresType::Jsonb"
        );
        assert_eq!(
            SqlAccessError::unsupported_provider("oracle").to_string(),
            "Provider 'oracle' is not supported"
        );
    }
}
