use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::{TryStreamExt, pin_mut};
use serde_json::Value as JsonValue;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Row, Statement};

use super::params::{LossyText, PgNumeric, declared_type};
use crate::command::{CommandRequest, ExecMode, RawOutcome};
use crate::error::SqlAccessError;
use crate::reader::RowSink;
use crate::results::{OutputValues, ResultSet};
use crate::translation::{PlaceholderStyle, rewrite_named_placeholders};
use crate::types::{CommandKind, ParameterDirection, RowValues};

/// SQL text and the parameter indexes bound to `$1`, `$2`, ...
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PgCommand {
    pub(crate) sql: String,
    pub(crate) bind: Vec<usize>,
}

/// Quote the parts of a qualified name that are not plain identifiers. Plain parts are
/// left alone so they fold to lower case as usual.
pub(crate) fn qualified_name(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim();
            let plain = part
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if plain || (part.len() >= 2 && part.starts_with('"') && part.ends_with('"')) {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn build_command(req: &CommandRequest<'_>) -> PgCommand {
    let inputs: Vec<usize> = req
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction().is_input())
        .map(|(i, _)| i)
        .collect();

    match req.kind {
        CommandKind::Text => {
            let names: Vec<&str> = inputs.iter().map(|&i| req.params[i].name()).collect();
            let rewritten = rewrite_named_placeholders(req.text, PlaceholderStyle::Numbered, &names);
            PgCommand {
                sql: rewritten.sql.into_owned(),
                bind: rewritten.bind_order.iter().map(|&n| inputs[n]).collect(),
            }
        }
        CommandKind::StoredProcedure => {
            let args: Vec<String> = (1..=inputs.len()).map(|n| format!("${n}")).collect();
            PgCommand {
                sql: format!(
                    "SELECT * FROM {}({})",
                    qualified_name(req.text),
                    args.join(", ")
                ),
                bind: inputs,
            }
        }
        CommandKind::TableDirect => PgCommand {
            sql: format!("SELECT * FROM {}", qualified_name(req.text)),
            bind: Vec::new(),
        },
    }
}

/// Prepare with the declared types of tagged parameters; the server infers the rest.
async fn prepare(
    client: &Client,
    cmd: &PgCommand,
    req: &CommandRequest<'_>,
) -> Result<Statement, SqlAccessError> {
    let declared: Vec<Option<Type>> = cmd
        .bind
        .iter()
        .map(|&i| declared_type(&req.params[i]))
        .collect();

    if declared.iter().all(Option::is_none) {
        return Ok(client.prepare(&cmd.sql).await?);
    }
    if let Some(types) = declared.iter().cloned().collect::<Option<Vec<Type>>>() {
        return Ok(client.prepare_typed(&cmd.sql, &types).await?);
    }
    let inferred = client.prepare(&cmd.sql).await?;
    let types: Vec<Type> = inferred
        .params()
        .iter()
        .zip(declared.iter().chain(std::iter::repeat(&None)))
        .map(|(server, declared)| declared.clone().unwrap_or_else(|| server.clone()))
        .collect();
    Ok(client.prepare_typed(&cmd.sql, &types).await?)
}

/// Values in bind order, converted for their parameter types.
fn bound_values(
    cmd: &PgCommand,
    req: &CommandRequest<'_>,
) -> Result<Vec<RowValues>, SqlAccessError> {
    cmd.bind.iter().map(|&i| req.params[i].bind_value()).collect()
}

fn as_sql(values: &[RowValues]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn column_names(stmt: &Statement) -> Vec<String> {
    stmt.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Run a command and collect what it returns.
pub(crate) async fn run(
    client: &Client,
    req: &CommandRequest<'_>,
    mode: ExecMode,
) -> Result<RawOutcome, SqlAccessError> {
    let cmd = build_command(req);
    let stmt = prepare(client, &cmd, req).await?;
    let values = bound_values(&cmd, req)?;
    let params = as_sql(&values);
    let mut outcome = RawOutcome::default();

    if stmt.columns().is_empty() {
        outcome.rows_affected = client.execute(&stmt, &params).await?;
    } else {
        let rows = client.query(&stmt, &params).await?;
        let mut set = ResultSet::with_columns(Arc::new(column_names(&stmt)));
        for row in &rows {
            set.add_row_values(row_values(row)?);
        }
        outcome.rows_affected = rows.len() as u64;
        outcome.outputs = read_outputs(req, &set);
        outcome.result_sets.push(set);
    }

    let returned_rows = outcome
        .result_sets
        .first()
        .is_some_and(|set| !set.results.is_empty());
    if mode == ExecMode::Identity && !returned_rows {
        outcome.identity = Some(last_value(client).await?);
    }
    Ok(outcome)
}

/// Output parameters come back as columns of the first row: matched by name, then by
/// position among the outputs. A return value is the first column and shifts the rest.
fn read_outputs(req: &CommandRequest<'_>, set: &ResultSet) -> OutputValues {
    let mut outputs = OutputValues::default();
    let Some(row) = set.results.first() else {
        return outputs;
    };
    let has_return = req
        .params
        .iter()
        .any(|p| p.direction() == ParameterDirection::ReturnValue);
    let mut position = usize::from(has_return);
    for param in req.params.iter().filter(|p| p.direction().is_output()) {
        let value = if param.direction() == ParameterDirection::ReturnValue {
            row.get_by_index(0)
        } else {
            let by_name = row.get(param.name());
            let by_position = row.get_by_index(position);
            position += 1;
            by_name.or(by_position)
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

async fn last_value(client: &Client) -> Result<RowValues, SqlAccessError> {
    let row = client.query_one("SELECT lastval()", &[]).await.map_err(|e| {
        SqlAccessError::DecodeError(format!("no identity value is available: {e}"))
    })?;
    let id: i64 = row.try_get(0)?;
    Ok(RowValues::Int(id))
}

/// Forward the rows of a command to a streaming reader.
pub(crate) async fn stream(
    client: &Client,
    req: &CommandRequest<'_>,
    sink: &mut RowSink,
) -> Result<(), SqlAccessError> {
    let cmd = build_command(req);
    let stmt = prepare(client, &cmd, req).await?;
    sink.columns(column_names(&stmt));

    let values = bound_values(&cmd, req)?;
    let rows = client.query_raw(&stmt, as_sql(&values)).await?;
    pin_mut!(rows);
    while let Some(row) = rows.try_next().await? {
        if !sink.push(row_values(&row)?).await {
            break;
        }
    }
    Ok(())
}

fn row_values(row: &Row) -> Result<Vec<RowValues>, SqlAccessError> {
    (0..row.len()).map(|i| column_value(row, i)).collect()
}

/// Convert one column. Numerics and UUIDs come back as text.
pub(crate) fn column_value(row: &Row, idx: usize) -> Result<RowValues, SqlAccessError> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(RowValues::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| RowValues::Int(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| RowValues::Int(i64::from(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(RowValues::Int),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| RowValues::Int(i64::from(v))),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| RowValues::Float(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(RowValues::Float),
        Type::NUMERIC => row
            .try_get::<_, Option<PgNumeric>>(idx)?
            .map(|n| RowValues::Text(n.0)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(idx)?.map(RowValues::Text)
        }
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(RowValues::Date),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|t| RowValues::Text(t.to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(RowValues::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|dt| RowValues::Timestamp(dt.naive_utc())),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|id| RowValues::Text(id.hyphenated().to_string())),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<JsonValue>>(idx)?
            .map(RowValues::JSON),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(RowValues::Blob),
        _ => row
            .try_get::<_, Option<LossyText>>(idx)?
            .map(|t| RowValues::Text(t.0)),
    };
    Ok(value.unwrap_or(RowValues::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_types::{DbType, PostgresType};
    use crate::params::{Parameter, ParameterBuilder};
    use crate::types::ProviderIdentity;

    fn builder() -> ParameterBuilder {
        ParameterBuilder::new(ProviderIdentity::PostgreSql)
    }

    #[test]
    fn values_are_converted_when_bound() {
        let params: Vec<Parameter> = vec![
            builder()
                .specific("doc", "{\"a\":1}", PostgresType::Jsonb, ParameterDirection::Input)
                .unwrap(),
            builder()
                .sized("code", 2, "abcd", DbType::String, ParameterDirection::Input)
                .unwrap(),
        ];
        let req = CommandRequest {
            text: "INSERT INTO docs(body, code) VALUES (@doc, @code)",
            kind: CommandKind::Text,
            params: &params,
        };
        let cmd = build_command(&req);
        let values = bound_values(&cmd, &req).unwrap();
        assert_eq!(
            values,
            vec![
                RowValues::JSON(serde_json::json!({ "a": 1 })),
                RowValues::Text("ab".into()),
            ]
        );
        assert_eq!(params[0].value(), &RowValues::Text("{\"a\":1}".into()));
        assert_eq!(as_sql(&values).len(), 2);
    }

    #[test]
    fn text_placeholders_become_numbered() {
        let params: Vec<Parameter> = vec![
            builder()
                .value_only("name", "widget", ParameterDirection::Input)
                .unwrap(),
            builder()
                .generic("qty", 3_i64, DbType::Int32, ParameterDirection::Input)
                .unwrap(),
        ];
        let req = CommandRequest {
            text: "UPDATE items SET qty = @qty WHERE name = :name OR alias = @name",
            kind: CommandKind::Text,
            params: &params,
        };
        let cmd = build_command(&req);
        assert_eq!(
            cmd.sql,
            "UPDATE items SET qty = $1 WHERE name = $2 OR alias = $2"
        );
        assert_eq!(cmd.bind, vec![1, 0]);
    }

    #[test]
    fn functions_are_selected_from_with_inputs_only() {
        let params = vec![
            builder()
                .value_only("customer", 7_i64, ParameterDirection::Input)
                .unwrap(),
            builder()
                .typed_only("total", PostgresType::Numeric, ParameterDirection::Output)
                .unwrap(),
            builder()
                .value_only("region", "EU", ParameterDirection::InputOutput)
                .unwrap(),
        ];
        let req = CommandRequest {
            text: "sales.order_total",
            kind: CommandKind::StoredProcedure,
            params: &params,
        };
        let cmd = build_command(&req);
        assert_eq!(cmd.sql, "SELECT * FROM sales.order_total($1, $2)");
        assert_eq!(cmd.bind, vec![0, 2]);
    }

    #[test]
    fn table_direct_quotes_odd_names() {
        let req = CommandRequest {
            text: "public.Order Lines",
            kind: CommandKind::TableDirect,
            params: &[],
        };
        assert_eq!(
            build_command(&req).sql,
            "SELECT * FROM public.\"Order Lines\""
        );
    }

    #[test]
    fn outputs_read_by_name_then_position() {
        let params = vec![
            builder()
                .typed_only("status", DbType::Int32, ParameterDirection::ReturnValue)
                .unwrap(),
            builder()
                .typed_only("total", DbType::Decimal, ParameterDirection::Output)
                .unwrap(),
            builder()
                .typed_only("count", DbType::Int32, ParameterDirection::Output)
                .unwrap(),
        ];
        let req = CommandRequest {
            text: "f",
            kind: CommandKind::StoredProcedure,
            params: &params,
        };
        let mut set = ResultSet::with_columns(Arc::new(vec![
            "order_status".into(),
            "sum".into(),
            "count".into(),
        ]));
        set.add_row_values(vec![
            RowValues::Int(1),
            RowValues::Text("9.50".into()),
            RowValues::Int(4),
        ]);
        let outputs = read_outputs(&req, &set);
        assert_eq!(outputs.get("total"), Some(&RowValues::Text("9.50".into())));
        assert_eq!(outputs.get("@count"), Some(&RowValues::Int(4)));
        assert_eq!(outputs.return_value(), Some(&RowValues::Int(1)));
    }
}
