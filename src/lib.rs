//! Provider-agnostic async access to SQL Server, PostgreSQL and MySQL.
//!
//! A named connection is resolved once into an [`AccessManager`]; every call then opens
//! its own connection, binds parameters for the configured provider, runs the command
//! and closes the connection again.
//!
//! ```rust,no_run
//! use sql_access_layer::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlAccessError> {
//! let source = EnvConfigSource::new();
//! let db = AccessManager::new("Main", &source)?;
//! let open: Vec<i64> = db
//!     .query(CommandSpec::text("SELECT id FROM orders WHERE state = @state").param("@state", "open"))
//!     .await?;
//! # let _ = open;
//! # Ok(())
//! # }
//! ```

#[cfg(not(any(feature = "mssql", feature = "postgres", feature = "mysql")))]
compile_error!("enable at least one of the `mssql`, `postgres` or `mysql` features");

pub mod adapter;
pub mod command;
pub mod config;
pub mod conn_string;
pub mod connection;
pub mod db_types;
pub mod error;
pub mod factory;
pub mod manager;
pub mod mapper;
pub mod params;
pub mod prelude;
pub mod reader;
pub mod results;
pub mod translation;
pub mod types;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use adapter::{BackendAdapter, DataAccess};
pub use command::{BulkFiller, Command, CommandSpec};
pub use config::{AppSettings, ConfigSource, ConnectionConfig, EnvConfigSource, MapConfigSource};
pub use connection::{Connection, ConnectionStatus, Transaction};
pub use error::{ErrorKind, SqlAccessError};
pub use factory::ProviderFactory;
pub use manager::{AccessManager, ManagerOptions};
pub use reader::StreamingReader;
pub use results::{CustomDbRow, DataSet, ExecuteOutcome, OutputValues, ResultSet};
pub use types::{CommandKind, IsolationLevel, ParameterDirection, ProviderIdentity, RowValues};
