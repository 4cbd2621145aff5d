use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use sql_access_layer::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run commands against a configured sql-access-layer connection")]
pub(crate) struct Args {
    /// appsettings.json holding a `ConnectionStrings` section
    #[arg(long)]
    pub(crate) settings: Option<PathBuf>,
    /// Connection name to resolve
    #[arg(long, default_value = "Main")]
    pub(crate) connection: String,
    #[arg(long, value_enum, requires = "connection_string")]
    pub(crate) provider: Option<ProviderIdentity>,
    #[arg(long, requires = "provider")]
    pub(crate) connection_string: Option<String>,
    /// Command timeout, e.g. `30s`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) timeout: Option<Duration>,
    /// Copy log output to this file
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long, short)]
    pub(crate) verbose: bool,
    /// Command parameter as `name=value`; values are read as JSON when they parse
    #[arg(
        long = "param",
        value_name = "NAME=VALUE",
        value_parser = parse_param,
        global = true
    )]
    pub(crate) params: Vec<ParamArg>,
    #[command(subcommand)]
    pub(crate) action: Action,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Action {
    /// Open and close a connection
    Check,
    /// Print the first column of the first row
    Scalar { sql: String },
    /// Print the first result set
    Table {
        sql: String,
        /// Read through the streaming reader
        #[arg(long)]
        stream: bool,
    },
    /// Run a statement and print the rows affected
    Exec {
        sql: String,
        #[arg(long)]
        transaction: bool,
        #[arg(long, value_enum, requires = "transaction")]
        isolation: Option<IsolationLevel>,
    },
    /// Call a stored procedure
    Proc {
        name: String,
        /// Run for side effects only and print rows affected and outputs
        #[arg(long)]
        exec: bool,
        /// Output parameter as `name=type` using a generic type name such as `int64`
        #[arg(long = "out", value_name = "NAME=TYPE", value_parser = parse_output)]
        outputs: Vec<OutputArg>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParamArg {
    pub(crate) name: String,
    pub(crate) value: RowValues,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OutputArg {
    pub(crate) name: String,
    pub(crate) db_type: DbType,
}

impl Args {
    pub(crate) fn parameter_specs(&self) -> Vec<ParameterSpec> {
        self.params
            .iter()
            .map(|p| ParameterSpec::new(p.name.clone(), p.value.clone()))
            .collect()
    }
}

fn parse_param(raw: &str) -> Result<ParamArg, String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.trim().is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    Ok(ParamArg {
        name: name.trim().to_string(),
        value: parse_value(value),
    })
}

fn parse_output(raw: &str) -> Result<OutputArg, String> {
    let (name, type_name) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=TYPE, got '{raw}'"))?;
    let db_type = match type_name.trim().to_ascii_lowercase().as_str() {
        "string" | "text" => DbType::String,
        "bool" | "boolean" => DbType::Boolean,
        "int16" => DbType::Int16,
        "int" | "int32" => DbType::Int32,
        "int64" | "bigint" => DbType::Int64,
        "double" | "float" => DbType::Double,
        "decimal" => DbType::Decimal,
        "date" => DbType::Date,
        "datetime" => DbType::DateTime,
        "guid" | "uuid" => DbType::Guid,
        "json" => DbType::Json,
        other => return Err(format!("unknown type '{other}'")),
    };
    Ok(OutputArg {
        name: name.trim().to_string(),
        db_type,
    })
}

/// JSON scalars keep their type; anything that is not JSON is text.
fn parse_value(raw: &str) -> RowValues {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => RowValues::Null,
        Ok(Value::Bool(b)) => RowValues::Bool(b),
        Ok(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => RowValues::Int(i),
            (None, Some(f)) => RowValues::Float(f),
            (None, None) => RowValues::Text(raw.to_string()),
        },
        Ok(Value::String(s)) => RowValues::Text(s),
        Ok(other) => RowValues::JSON(other),
        Err(_) => RowValues::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_keep_json_scalar_types() {
        assert_eq!(parse_param("@id=42").unwrap().value, RowValues::Int(42));
        assert_eq!(parse_param("ratio=0.5").unwrap().value, RowValues::Float(0.5));
        assert_eq!(parse_param("flag=true").unwrap().value, RowValues::Bool(true));
        assert_eq!(parse_param("x=null").unwrap().value, RowValues::Null);
        assert_eq!(
            parse_param("name=ACME Corp").unwrap().value,
            RowValues::Text("ACME Corp".into())
        );
        assert_eq!(
            parse_param("quoted=\"42\"").unwrap().value,
            RowValues::Text("42".into())
        );
        assert_eq!(
            parse_param("expr=a=b").unwrap(),
            ParamArg {
                name: "expr".into(),
                value: RowValues::Text("a=b".into())
            }
        );
    }

    #[test]
    fn malformed_params_are_rejected() {
        assert!(parse_param("noequals").is_err());
        assert!(parse_param("=1").is_err());
        assert!(parse_output("total=money").is_err());
        assert_eq!(parse_output("@total=Int64").unwrap().db_type, DbType::Int64);
    }

    #[test]
    fn exec_accepts_isolation_with_transaction() {
        let args = Args::try_parse_from([
            "sqlaccess",
            "--param",
            "@id=1",
            "exec",
            "UPDATE t SET x = 1 WHERE id = @id",
            "--transaction",
            "--isolation",
            "serializable",
        ])
        .unwrap();
        assert_eq!(args.parameter_specs().len(), 1);
        match args.action {
            Action::Exec {
                transaction,
                isolation,
                ..
            } => {
                assert!(transaction);
                assert_eq!(isolation, Some(IsolationLevel::Serializable));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(
            Args::try_parse_from(["sqlaccess", "exec", "SELECT 1", "--isolation", "snapshot"])
                .is_err()
        );
    }
}
