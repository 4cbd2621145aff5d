use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlConnection, MySqlQueryResult, MySqlRow};
use sqlx::{Column, Either, Executor, Row, TypeInfo, ValueRef};

use super::params::{bind_value, quote_name, session_var};
use crate::command::{CommandRequest, ExecMode, RawOutcome};
use crate::error::SqlAccessError;
use crate::reader::RowSink;
use crate::results::{CustomDbRow, OutputValues, ResultSet};
use crate::translation::{PlaceholderStyle, rewrite_named_placeholders};
use crate::types::{CommandKind, ParameterDirection, RowValues};

/// Statements run for one command.
///
/// Input/output parameters are staged in session variables by `setup` before the
/// `CALL`; `read_back` selects every staged variable afterwards.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Plan {
    pub(crate) setup: Vec<(String, usize)>,
    pub(crate) main: String,
    pub(crate) bind: Vec<usize>,
    pub(crate) read_back: Option<String>,
    staged: Vec<usize>,
}

pub(crate) fn plan(req: &CommandRequest<'_>) -> Plan {
    let mut plan = Plan {
        setup: Vec::new(),
        main: String::new(),
        bind: Vec::new(),
        read_back: None,
        staged: Vec::new(),
    };

    match req.kind {
        CommandKind::Text => {
            let inputs: Vec<usize> = req
                .params
                .iter()
                .enumerate()
                .filter(|(_, p)| p.direction().is_input())
                .map(|(i, _)| i)
                .collect();
            let names: Vec<&str> = inputs.iter().map(|&i| req.params[i].name()).collect();
            let rewritten =
                rewrite_named_placeholders(req.text, PlaceholderStyle::Positional, &names);
            plan.main = rewritten.sql.into_owned();
            plan.bind = rewritten.bind_order.iter().map(|&n| inputs[n]).collect();
        }
        CommandKind::StoredProcedure => {
            let returns = req
                .params
                .iter()
                .any(|p| p.direction() == ParameterDirection::ReturnValue);
            let mut args = Vec::new();
            for (i, p) in req.params.iter().enumerate() {
                match p.direction() {
                    ParameterDirection::ReturnValue => {}
                    ParameterDirection::Input => {
                        args.push("?".to_string());
                        plan.bind.push(i);
                    }
                    // functions take plain values
                    ParameterDirection::InputOutput if returns => {
                        args.push("?".to_string());
                        plan.bind.push(i);
                    }
                    ParameterDirection::Output if returns => {}
                    ParameterDirection::InputOutput => {
                        plan.setup.push((format!("SET {} = ?", session_var(p.name())), i));
                        args.push(session_var(p.name()));
                        plan.staged.push(i);
                    }
                    ParameterDirection::Output => {
                        args.push(session_var(p.name()));
                        plan.staged.push(i);
                    }
                }
            }
            let verb = if returns { "SELECT" } else { "CALL" };
            plan.main = format!("{verb} {}({})", quote_name(req.text), args.join(", "));
            if !plan.staged.is_empty() {
                let columns: Vec<String> = plan
                    .staged
                    .iter()
                    .map(|&i| {
                        let name = req.params[i].name();
                        format!("{} AS `{name}`", session_var(name))
                    })
                    .collect();
                plan.read_back = Some(format!("SELECT {}", columns.join(", ")));
            }
        }
        CommandKind::TableDirect => {
            plan.main = format!("SELECT * FROM {}", quote_name(req.text));
        }
    }
    plan
}

async fn run_setup(
    conn: &mut MySqlConnection,
    plan: &Plan,
    req: &CommandRequest<'_>,
) -> Result<(), SqlAccessError> {
    for (sql, i) in &plan.setup {
        bind_value(sqlx::query(sql), req.params[*i].bind_value()?)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Statements without bound values go over the text protocol, which also accepts
/// statements the server refuses to prepare (`CREATE PROCEDURE`, multi-statement text).
fn main_stream<'e>(
    conn: &'e mut MySqlConnection,
    plan: &'e Plan,
    values: Vec<RowValues>,
) -> BoxStream<'e, Result<Either<MySqlQueryResult, MySqlRow>, sqlx::Error>> {
    if plan.bind.is_empty() {
        return conn.fetch_many(plan.main.as_str());
    }
    let mut query = sqlx::query(&plan.main);
    for value in values {
        query = bind_value(query, value);
    }
    conn.fetch_many(query)
}

/// Values for the main statement's `?` placeholders, converted for their types.
fn bound_values(
    plan: &Plan,
    req: &CommandRequest<'_>,
) -> Result<Vec<RowValues>, SqlAccessError> {
    plan.bind.iter().map(|&i| req.params[i].bind_value()).collect()
}

fn column_names(row: &MySqlRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Run a command and collect every result set it produces.
pub(crate) async fn run(
    conn: &mut MySqlConnection,
    req: &CommandRequest<'_>,
    mode: ExecMode,
) -> Result<RawOutcome, SqlAccessError> {
    let plan = plan(req);
    let values = bound_values(&plan, req)?;
    run_setup(conn, &plan, req).await?;

    let mut outcome = RawOutcome::default();
    let mut last_insert_id = 0;
    let mut current: Option<ResultSet> = None;
    {
        let mut stream = main_stream(conn, &plan, values);
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => {
                    outcome.rows_affected += done.rows_affected();
                    if done.last_insert_id() != 0 {
                        last_insert_id = done.last_insert_id();
                    }
                    if let Some(set) = current.take() {
                        outcome.result_sets.push(set);
                    }
                }
                Either::Right(row) => {
                    let set = current.get_or_insert_with(|| {
                        ResultSet::with_columns(Arc::new(column_names(&row)))
                    });
                    set.add_row_values(row_values(&row)?);
                }
            }
        }
    }
    if let Some(set) = current.take() {
        outcome.result_sets.push(set);
    }
    if outcome.result_sets.is_empty() {
        outcome.result_sets.push(ResultSet::default());
    }

    if mode == ExecMode::Identity && last_insert_id != 0 {
        let id = i64::try_from(last_insert_id).map_err(|_| {
            SqlAccessError::DecodeError(format!("identity {last_insert_id} does not fit in i64"))
        })?;
        outcome.identity = Some(RowValues::Int(id));
    }

    let staged_row = match &plan.read_back {
        Some(sql) => match sqlx::query(sql).fetch_optional(&mut *conn).await? {
            Some(row) => Some(CustomDbRow::new(
                Arc::new(column_names(&row)),
                row_values(&row)?,
            )),
            None => None,
        },
        None => None,
    };
    outcome.outputs = read_outputs(req, &outcome.result_sets, staged_row.as_ref());
    Ok(outcome)
}

/// Staged outputs come from the read-back row. A return value, and outputs of plain
/// text commands, come from the first row the command returned.
fn read_outputs(
    req: &CommandRequest<'_>,
    sets: &[ResultSet],
    staged: Option<&CustomDbRow>,
) -> OutputValues {
    let mut outputs = OutputValues::default();
    let first_row = sets.first().and_then(|set| set.results.first());
    for param in req.params.iter().filter(|p| p.direction().is_output()) {
        let value = if param.direction() == ParameterDirection::ReturnValue {
            first_row.and_then(|row| row.get_by_index(0))
        } else {
            staged
                .and_then(|row| row.get(param.name()))
                .or_else(|| first_row.and_then(|row| row.get(param.name())))
        }
        .cloned()
        .unwrap_or(RowValues::Null);
        if param.direction() == ParameterDirection::ReturnValue {
            outputs.set_return_value(value.clone());
        }
        outputs.insert(param.name(), value);
    }
    outputs
}

/// Forward the first result set of a command to a streaming reader.
pub(crate) async fn stream(
    conn: &mut MySqlConnection,
    req: &CommandRequest<'_>,
    sink: &mut RowSink,
) -> Result<(), SqlAccessError> {
    let plan = plan(req);
    let values = bound_values(&plan, req)?;
    run_setup(conn, &plan, req).await?;

    let mut seen_rows = false;
    let mut stream = main_stream(conn, &plan, values);
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(_) if seen_rows => break,
            Either::Left(_) => {}
            Either::Right(row) => {
                if !seen_rows {
                    sink.columns(column_names(&row));
                    seen_rows = true;
                }
                if !sink.push(row_values(&row)?).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn row_values(row: &MySqlRow) -> Result<Vec<RowValues>, SqlAccessError> {
    (0..row.len()).map(|i| column_value(row, i)).collect()
}

/// Convert one column by its reported type. Decimals come back as text.
pub(crate) fn column_value(row: &MySqlRow, idx: usize) -> Result<RowValues, SqlAccessError> {
    let type_name = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(RowValues::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "BOOLEAN" => RowValues::Bool(row.try_get_unchecked::<bool, _>(idx)?),
        unsigned if unsigned.ends_with("UNSIGNED") => {
            let v = row.try_get_unchecked::<u64, _>(idx)?;
            i64::try_from(v).map_or_else(|_| RowValues::Text(v.to_string()), RowValues::Int)
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            RowValues::Int(row.try_get_unchecked::<i64, _>(idx)?)
        }
        "FLOAT" => RowValues::Float(f64::from(row.try_get_unchecked::<f32, _>(idx)?)),
        "DOUBLE" => RowValues::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "DATE" => RowValues::Date(row.try_get_unchecked::<NaiveDate, _>(idx)?),
        "DATETIME" | "TIMESTAMP" => {
            RowValues::Timestamp(row.try_get_unchecked::<NaiveDateTime, _>(idx)?)
        }
        "TIME" => RowValues::Text(row.try_get_unchecked::<NaiveTime, _>(idx)?.to_string()),
        "JSON" => RowValues::JSON(row.try_get_unchecked::<JsonValue, _>(idx)?),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => RowValues::Blob(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        _ => RowValues::Text(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}
