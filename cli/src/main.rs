mod args;
mod logging;
mod output;

use std::process::ExitCode;

use clap::Parser;
use futures_util::TryStreamExt;
use serde_json::{Value, json};
use sql_access_layer::mapper::row_value_to_json;
use sql_access_layer::prelude::*;
use tracing::Level;

use crate::args::{Action, Args};
use crate::logging::LogWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let writer = LogWriter::new(args.log.clone()).unwrap_or_else(|err| {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_target(false)
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    match run(args).await {
        Ok(value) => {
            let rendered =
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            println!("{rendered}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(kind = ?err.kind(), "{err}");
            ExitCode::FAILURE
        }
    }
}

fn manager(args: &Args) -> Result<AccessManager, SqlAccessError> {
    let db = match (&args.provider, &args.connection_string) {
        (Some(provider), Some(conn)) => AccessManager::from_config(ConnectionConfig::new(
            args.connection.clone(),
            conn.clone(),
            *provider,
        ))?,
        _ => match &args.settings {
            Some(path) => AccessManager::new(&args.connection, &AppSettings::load(path)?)?,
            None => AccessManager::new(&args.connection, &EnvConfigSource::new())?,
        },
    };
    Ok(db.with_options(ManagerOptions {
        default_timeout: args.timeout,
    }))
}

async fn run(args: Args) -> Result<Value, SqlAccessError> {
    let db = manager(&args)?;
    let params = args.parameter_specs();
    tracing::debug!(connection = %db.config().name, provider = %db.provider(), "resolved");

    match args.action {
        Action::Check => {
            let mut conn = db.open_connection().await?;
            db.close_connection(&mut conn).await;
            Ok(json!({
                "connection": db.config().name,
                "provider": db.provider().provider_name(),
                "status": "ok",
            }))
        }
        Action::Scalar { sql } => {
            let value = db.get_scalar(CommandSpec::text(sql).params(params)).await?;
            Ok(json!({
                "found": value.is_some(),
                "value": value.as_ref().map_or(Value::Null, row_value_to_json),
            }))
        }
        Action::Table { sql, stream: false } => {
            let table = db.get_table(CommandSpec::text(sql).params(params)).await?;
            Ok(output::result_set(&table))
        }
        Action::Table { sql, stream: true } => {
            let reader = db.get_reader(CommandSpec::text(sql).params(params)).await?;
            let columns = reader.columns().to_vec();
            let rows: Vec<Value> = reader
                .map_ok(|row| output::row(&row))
                .try_collect()
                .await?;
            Ok(json!({ "columns": columns, "rows": rows }))
        }
        Action::Exec {
            sql,
            transaction,
            isolation,
        } => {
            let mut spec = CommandSpec::text(sql).params(params);
            spec.isolation = isolation;
            let rows_affected = if transaction {
                db.execute_with_transaction(spec).await?
            } else {
                db.execute(spec).await?
            };
            Ok(json!({ "rows_affected": rows_affected }))
        }
        Action::Proc {
            name,
            exec,
            outputs,
        } => {
            let spec = CommandSpec::stored_procedure(name).params(params).params(
                outputs
                    .into_iter()
                    .map(|out| ParameterSpec::output(out.name, out.db_type)),
            );
            if exec {
                let outcome = db.execute_stored_procedure(spec).await?;
                Ok(output::execute_outcome(&outcome))
            } else {
                let data = db.get_result_sets(spec).await?;
                Ok(output::data_set(&data))
            }
        }
    }
}
