use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use tiberius::{ColumnData, FromSql, Query, QueryItem, QueryStream};

use super::config::MssqlClient;
use super::params::{bind_value, declared_type, quote_name};
use crate::command::{CommandRequest, ExecMode, RawOutcome};
use crate::error::SqlAccessError;
use crate::reader::RowSink;
use crate::results::ResultSet;
use crate::types::{CommandKind, ParameterDirection, RowValues};

const ROWCOUNT_VAR: &str = "@__sal_rowcount";
const IDENTITY_COLUMN: &str = "__identity";
const ROWCOUNT_COLUMN: &str = "__rowcount";

/// The T-SQL batch sent for one command.
///
/// Parameters are declared as local variables initialised from the positional `@Pn`
/// slots tiberius binds, so command text can refer to them by name. When outputs or an
/// identity are requested a trailing `SELECT` reads them back as the last result set.
#[derive(Debug)]
pub(crate) struct Batch {
    pub(crate) sql: String,
    /// Values for the `@Pn` slots, in slot order.
    values: Vec<RowValues>,
    trailer: bool,
    identity: bool,
    outputs: Vec<usize>,
}

pub(crate) fn build_batch(
    req: &CommandRequest<'_>,
    mode: ExecMode,
) -> Result<Batch, SqlAccessError> {
    let identity = mode == ExecMode::Identity;
    let outputs: Vec<usize> = req
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction().is_output())
        .map(|(i, _)| i)
        .collect();
    let trailer = identity || !outputs.is_empty();

    let mut sql = String::new();
    let mut values = Vec::new();
    for p in req.params {
        let bound = p.bind_value()?;
        let ty = declared_type(p, &bound);
        if p.direction().is_input() {
            values.push(bound);
            let _ = writeln!(sql, "DECLARE @{} {ty} = @P{};", p.name(), values.len());
        } else {
            let _ = writeln!(sql, "DECLARE @{} {ty};", p.name());
        }
    }
    if trailer {
        let _ = writeln!(sql, "DECLARE {ROWCOUNT_VAR} BIGINT;");
    }

    match req.kind {
        CommandKind::Text => sql.push_str(req.text),
        CommandKind::StoredProcedure => sql.push_str(&exec_statement(req)),
        CommandKind::TableDirect => {
            let _ = write!(sql, "SELECT * FROM {}", quote_name(req.text));
        }
    }
    sql.push('\n');

    if trailer {
        let _ = writeln!(sql, "SET {ROWCOUNT_VAR} = @@ROWCOUNT;");
        let mut columns = Vec::with_capacity(outputs.len() + 2);
        if identity {
            // SCOPE_IDENTITY() is NULL after an EXEC; @@IDENTITY sees the procedure's insert
            let expr = if req.kind == CommandKind::StoredProcedure {
                "COALESCE(SCOPE_IDENTITY(), @@IDENTITY)"
            } else {
                "SCOPE_IDENTITY()"
            };
            columns.push(format!("CAST({expr} AS BIGINT) AS [{IDENTITY_COLUMN}]"));
        }
        for &i in &outputs {
            columns.push(format!("@{0} AS [{0}]", req.params[i].name()));
        }
        columns.push(format!("{ROWCOUNT_VAR} AS [{ROWCOUNT_COLUMN}]"));
        let _ = write!(sql, "SELECT {};", columns.join(", "));
    }

    Ok(Batch {
        sql,
        values,
        trailer,
        identity,
        outputs,
    })
}

fn exec_statement(req: &CommandRequest<'_>) -> String {
    let mut stmt = String::from("EXEC ");
    if let Some(ret) = req
        .params
        .iter()
        .find(|p| p.direction() == ParameterDirection::ReturnValue)
    {
        let _ = write!(stmt, "@{} = ", ret.name());
    }
    stmt.push_str(&quote_name(req.text));
    let args: Vec<String> = req
        .params
        .iter()
        .filter(|p| p.direction() != ParameterDirection::ReturnValue)
        .map(|p| {
            if p.direction().is_output() {
                format!("@{0} = @{0} OUTPUT", p.name())
            } else {
                format!("@{0} = @{0}", p.name())
            }
        })
        .collect();
    if !args.is_empty() {
        stmt.push(' ');
        stmt.push_str(&args.join(", "));
    }
    stmt
}

fn bound_query(batch: &Batch) -> Query<'_> {
    let mut query = Query::new(batch.sql.as_str());
    for value in &batch.values {
        bind_value(&mut query, value);
    }
    query
}

/// Run a command and collect everything it returns.
pub(crate) async fn run(
    client: &mut MssqlClient,
    req: &CommandRequest<'_>,
    mode: ExecMode,
) -> Result<RawOutcome, SqlAccessError> {
    let batch = build_batch(req, mode)?;
    let query = bound_query(&batch);

    if mode == ExecMode::NonQuery && !batch.trailer {
        let result = query.execute(client).await?;
        return Ok(RawOutcome {
            rows_affected: result.rows_affected().iter().sum(),
            ..RawOutcome::default()
        });
    }

    let stream = query.query(client).await?;
    let mut result_sets = collect_result_sets(stream).await?;
    let mut outcome = RawOutcome::default();

    if batch.trailer {
        let trailer = result_sets.pop().ok_or_else(|| {
            SqlAccessError::ExecutionError("SQL Server batch returned no output row".into())
        })?;
        let row = trailer.results.first().ok_or_else(|| {
            SqlAccessError::ExecutionError("SQL Server output row is empty".into())
        })?;
        if batch.identity {
            outcome.identity = row.get(IDENTITY_COLUMN).cloned();
        }
        for &i in &batch.outputs {
            let param = &req.params[i];
            let value = row.get(param.name()).cloned().unwrap_or(RowValues::Null);
            if param.direction() == ParameterDirection::ReturnValue {
                outcome.outputs.set_return_value(value.clone());
            }
            outcome.outputs.insert(param.name(), value);
        }
        outcome.rows_affected = row
            .get(ROWCOUNT_COLUMN)
            .and_then(RowValues::as_int)
            .and_then(|n| u64::try_from(*n).ok())
            .unwrap_or(0);
    } else {
        outcome.rows_affected = result_sets.iter().map(|rs| rs.results.len() as u64).sum();
    }

    outcome.result_sets = result_sets;
    Ok(outcome)
}

/// Forward the first result set of a command to a streaming reader.
pub(crate) async fn stream(
    client: &mut MssqlClient,
    req: &CommandRequest<'_>,
    sink: &mut RowSink,
) -> Result<(), SqlAccessError> {
    let batch = build_batch(req, ExecMode::Query)?;
    let query = bound_query(&batch);
    let mut stream = query.query(client).await?;

    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                sink.columns(meta.columns().iter().map(|c| c.name().to_string()).collect());
            }
            QueryItem::Row(row) => {
                if sink.accepting() {
                    let values = row
                        .into_iter()
                        .map(column_value)
                        .collect::<Result<Vec<_>, _>>()?;
                    if !sink.push(values).await {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn collect_result_sets(
    mut stream: QueryStream<'_>,
) -> Result<Vec<ResultSet>, SqlAccessError> {
    let mut sets: Vec<ResultSet> = Vec::new();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let names: Vec<String> =
                    meta.columns().iter().map(|c| c.name().to_string()).collect();
                sets.push(ResultSet::with_columns(Arc::new(names)));
            }
            QueryItem::Row(row) => {
                let values = row
                    .into_iter()
                    .map(column_value)
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(current) = sets.last_mut() {
                    current.add_row_values(values);
                }
            }
        }
    }
    Ok(sets)
}

/// Convert one SQL Server column value.
///
/// Exact numerics come back as text so no precision is lost; GUIDs and XML as text.
fn column_value(data: ColumnData<'static>) -> Result<RowValues, SqlAccessError> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|v| RowValues::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| RowValues::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| RowValues::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(RowValues::Int),
        ColumnData::F32(v) => v.map(|v| RowValues::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(RowValues::Float),
        ColumnData::Bit(v) => v.map(RowValues::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| RowValues::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(|g| RowValues::Text(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| RowValues::Blob(b.to_vec())),
        ColumnData::Numeric(v) => v.map(|n| RowValues::Text(n.to_string())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| RowValues::Text(x.clone().into_owned().into_string())),
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(RowValues::Date),
        ColumnData::Time(_) => {
            NaiveTime::from_sql(&data)?.map(|t| RowValues::Text(t.to_string()))
        }
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map(RowValues::Timestamp)
        }
        ColumnData::DateTimeOffset(_) => {
            DateTime::<Utc>::from_sql(&data)?.map(|dt| RowValues::Timestamp(dt.naive_utc()))
        }
        #[allow(unreachable_patterns)]
        _ => None,
    };
    Ok(value.unwrap_or(RowValues::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_types::{DbType, SqlServerType};
    use crate::params::{Parameter, ParameterBuilder};
    use crate::types::ProviderIdentity;

    fn params() -> Vec<Parameter> {
        let b = ParameterBuilder::new(ProviderIdentity::SqlServer);
        vec![
            b.generic("name", "widget", DbType::String, ParameterDirection::Input)
                .unwrap(),
            b.typed_only("new_id", DbType::Int32, ParameterDirection::Output)
                .unwrap(),
        ]
    }

    #[test]
    fn text_without_parameters_is_sent_unchanged() {
        let req = CommandRequest {
            text: "SELECT 1",
            kind: CommandKind::Text,
            params: &[],
        };
        assert_eq!(build_batch(&req, ExecMode::Query).unwrap().sql, "SELECT 1\n");
    }

    #[test]
    fn prelude_declares_inputs_and_outputs() {
        let params = params();
        let req = CommandRequest {
            text: "INSERT INTO Items(Name) VALUES (@name); SET @new_id = SCOPE_IDENTITY();",
            kind: CommandKind::Text,
            params: &params,
        };
        let batch = build_batch(&req, ExecMode::NonQuery).unwrap();
        assert!(batch.sql.starts_with(
            "DECLARE @name NVARCHAR(MAX) = @P1;\nDECLARE @new_id INT;\nDECLARE @__sal_rowcount BIGINT;\n"
        ));
        assert!(batch.sql.ends_with(
            "SET @__sal_rowcount = @@ROWCOUNT;\nSELECT @new_id AS [new_id], @__sal_rowcount AS [__rowcount];"
        ));
        assert!(batch.trailer);
    }

    #[test]
    fn identity_mode_selects_scope_identity() {
        let req = CommandRequest {
            text: "INSERT INTO Items(Name) VALUES ('x')",
            kind: CommandKind::Text,
            params: &[],
        };
        let batch = build_batch(&req, ExecMode::Identity).unwrap();
        assert!(batch
            .sql
            .contains("SELECT CAST(SCOPE_IDENTITY() AS BIGINT) AS [__identity]"));
        assert!(!batch.sql.contains("@@IDENTITY"));
    }

    #[test]
    fn identity_after_procedure_falls_back_to_session_identity() {
        let req = CommandRequest {
            text: "dbo.AddItem",
            kind: CommandKind::StoredProcedure,
            params: &[],
        };
        let batch = build_batch(&req, ExecMode::Identity).unwrap();
        assert!(batch.sql.contains(
            "SELECT CAST(COALESCE(SCOPE_IDENTITY(), @@IDENTITY) AS BIGINT) AS [__identity]"
        ));
    }

    #[test]
    fn slots_carry_converted_values() {
        let b = ParameterBuilder::new(ProviderIdentity::SqlServer);
        let params = vec![
            b.specific("amount", 2.5, SqlServerType::Money, ParameterDirection::Input)
                .unwrap(),
            b.specific("active", 1_i64, SqlServerType::Bit, ParameterDirection::Input)
                .unwrap(),
        ];
        let req = CommandRequest {
            text: "UPDATE Accounts SET Balance = @amount WHERE Active = @active",
            kind: CommandKind::Text,
            params: &params,
        };
        let batch = build_batch(&req, ExecMode::NonQuery).unwrap();
        assert!(batch.sql.starts_with(
            "DECLARE @amount MONEY = @P1;\nDECLARE @active BIT = @P2;\n"
        ));
        assert_eq!(
            batch.values,
            vec![RowValues::Text("2.5".into()), RowValues::Bool(true)]
        );
        assert_eq!(params[0].value(), &RowValues::Float(2.5));
    }

    #[test]
    fn positional_slot_names_never_reach_the_batch() {
        let b = ParameterBuilder::new(ProviderIdentity::SqlServer);
        assert!(matches!(
            b.value_only("p1", 5_i64, ParameterDirection::Input),
            Err(SqlAccessError::ParameterError(_))
        ));
        let params = vec![b.value_only("page", 5_i64, ParameterDirection::Input).unwrap()];
        let req = CommandRequest {
            text: "SELECT @page",
            kind: CommandKind::Text,
            params: &params,
        };
        let batch = build_batch(&req, ExecMode::Query).unwrap();
        assert_eq!(batch.sql, "DECLARE @page BIGINT = @P1;\nSELECT @page\n");
    }

    #[test]
    fn stored_procedure_passes_outputs_and_return_value() {
        let b = ParameterBuilder::new(ProviderIdentity::SqlServer);
        let params = vec![
            b.value_only("customer", 7_i64, ParameterDirection::Input).unwrap(),
            b.typed_only("total", DbType::Decimal, ParameterDirection::Output)
                .unwrap(),
            b.typed_only("status", DbType::Int32, ParameterDirection::ReturnValue)
                .unwrap(),
        ];
        let req = CommandRequest {
            text: "sales.GetTotal",
            kind: CommandKind::StoredProcedure,
            params: &params,
        };
        let batch = build_batch(&req, ExecMode::NonQuery).unwrap();
        assert!(batch.sql.contains(
            "EXEC @status = [sales].[GetTotal] @customer = @customer, @total = @total OUTPUT\n"
        ));
        assert!(batch.sql.contains("DECLARE @total DECIMAL(38, 10);"));
    }

    #[test]
    fn table_direct_selects_everything() {
        let req = CommandRequest {
            text: "dbo.Items",
            kind: CommandKind::TableDirect,
            params: &[],
        };
        assert_eq!(
            build_batch(&req, ExecMode::Query).unwrap().sql,
            "SELECT * FROM [dbo].[Items]\n"
        );
    }

    #[test]
    fn converts_column_data() {
        assert_eq!(
            column_value(ColumnData::I32(Some(5))).unwrap(),
            RowValues::Int(5)
        );
        assert_eq!(column_value(ColumnData::Bit(None)).unwrap(), RowValues::Null);
        assert_eq!(
            column_value(ColumnData::String(Some("x".into()))).unwrap(),
            RowValues::Text("x".into())
        );
    }
}
