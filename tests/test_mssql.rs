#![cfg(feature = "mssql")]

use std::env;

use sql_access_layer::prelude::*;
use tokio::runtime::Runtime;

/// `TEST_MSSQL_URL="Server=tcp:localhost,1433;Database=testing;User Id=sa;Password=...;TrustServerCertificate=true"`
fn manager() -> Option<AccessManager> {
    let Ok(conn) = env::var("TEST_MSSQL_URL") else {
        eprintln!("TEST_MSSQL_URL is not set; skipping SQL Server integration test");
        return None;
    };
    let source = MapConfigSource::new().with("Main", conn, "System.Data.SqlClient");
    Some(AccessManager::new("Main", &source).expect("valid TEST_MSSQL_URL"))
}

fn object_name(prefix: &str) -> String {
    format!("dbo.{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[test]
fn mssql_insert_then_scalar() -> Result<(), Box<dyn std::error::Error>> {
    let Some(db) = manager() else {
        return Ok(());
    };
    let table = object_name("sal_orders");
    let rt = Runtime::new()?;
    rt.block_on(async {
        db.execute(CommandSpec::text(format!(
            "CREATE TABLE {table} (id INT IDENTITY(1,1) PRIMARY KEY, customer NVARCHAR(100) NOT NULL, total MONEY NULL)"
        )))
        .await?;

        // SCOPE_IDENTITY() from the same batch
        let first = db
            .insert_returning_i32(
                CommandSpec::text(format!(
                    "INSERT INTO {table} (customer, total) VALUES (@customer, @total)"
                ))
                .param("@customer", "ACME")
                .bind(ParameterSpec::new("@total", 12.5).typed(SqlServerType::Money)),
            )
            .await?;
        assert_eq!(first, 1);

        let second = db
            .insert_returning_i64(
                CommandSpec::text(format!(
                    "INSERT INTO {table} (customer) OUTPUT INSERTED.id VALUES (@customer)"
                ))
                .param("@customer", "Globex"),
            )
            .await?;
        assert_eq!(second, 2);

        let customer = db
            .get_scalar(
                CommandSpec::text(format!("SELECT customer FROM {table} WHERE id = @id"))
                    .param("@id", 1_i64),
            )
            .await?;
        assert_eq!(customer, Some(RowValues::Text("ACME".into())));

        let missing = db
            .get_scalar(
                CommandSpec::text(format!("SELECT customer FROM {table} WHERE id = @id"))
                    .param("@id", 42_i64),
            )
            .await?;
        assert_eq!(missing, None);

        let none: Option<String> = db
            .query_single(
                CommandSpec::text(format!("SELECT customer FROM {table} WHERE id = @id"))
                    .param("@id", 42_i64),
            )
            .await?;
        assert!(none.is_none());

        let updated = db
            .execute(
                CommandSpec::text(format!("UPDATE {table} SET customer = @name"))
                    .param("@name", "Initech"),
            )
            .await?;
        assert_eq!(updated, 2);

        db.execute(CommandSpec::text(format!("DROP TABLE {table}")))
            .await?;
        Ok::<(), SqlAccessError>(())
    })?;
    Ok(())
}

#[test]
fn mssql_rollback_leaves_no_rows() -> Result<(), Box<dyn std::error::Error>> {
    let Some(db) = manager() else {
        return Ok(());
    };
    let table = object_name("sal_ledger");
    let rt = Runtime::new()?;
    rt.block_on(async {
        db.execute(CommandSpec::text(format!(
            "CREATE TABLE {table} (id INT PRIMARY KEY, amount INT NOT NULL)"
        )))
        .await?;

        let err = db
            .execute_all_with_transaction(
                &[
                    CommandSpec::text(format!("INSERT INTO {table} VALUES (@id, 10)"))
                        .param("@id", 1_i64),
                    CommandSpec::text(format!("INSERT INTO {table} VALUES (@id, 20)"))
                        .param("@id", 1_i64),
                ],
                Some(IsolationLevel::ReadCommitted),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SqlAccessError::MssqlError(_)), "{err:?}");

        let count = db
            .get_scalar(CommandSpec::text(format!("SELECT COUNT(*) FROM {table}")))
            .await?;
        assert_eq!(count, Some(RowValues::Int(0)));

        let outcome = db
            .insert_with_transaction(
                CommandSpec::text(format!("INSERT INTO {table} VALUES (@id, @amount)"))
                    .param("@id", 5_i64)
                    .param("@amount", 50_i64)
                    .isolation(IsolationLevel::Serializable),
            )
            .await?;
        assert_eq!(outcome.rows_affected, 1);

        db.execute(CommandSpec::text(format!("DROP TABLE {table}")))
            .await?;
        Ok::<(), SqlAccessError>(())
    })?;
    Ok(())
}

#[test]
fn mssql_procedure_outputs_and_return_value() -> Result<(), Box<dyn std::error::Error>> {
    let Some(db) = manager() else {
        return Ok(());
    };
    let proc = object_name("sal_double");
    let rt = Runtime::new()?;
    rt.block_on(async {
        db.execute(CommandSpec::text(format!(
            "CREATE PROCEDURE {proc} @a INT, @doubled INT OUTPUT AS \
             BEGIN SET NOCOUNT ON; SET @doubled = @a * 2; SELECT @a AS a; RETURN 5; END"
        )))
        .await?;

        let data = db
            .get_result_sets(
                CommandSpec::stored_procedure(proc.as_str())
                    .param("@a", 21_i64)
                    .bind(ParameterSpec::output("@doubled", DbType::Int32))
                    .bind(ParameterSpec::return_value("@ret", DbType::Int32)),
            )
            .await?;
        assert_eq!(data.outputs.get("@doubled"), Some(&RowValues::Int(42)));
        assert_eq!(data.outputs.return_value(), Some(&RowValues::Int(5)));
        assert_eq!(data.len(), 1);
        assert_eq!(data.first().and_then(ResultSet::first_value), Some(&RowValues::Int(21)));

        let rows: Vec<i64> = db
            .query_stored_procedure(
                CommandSpec::stored_procedure(proc.as_str())
                    .param("@a", 1_i64)
                    .bind(ParameterSpec::output("@doubled", DbType::Int32)),
            )
            .await?;
        assert_eq!(rows, vec![1]);

        db.execute(CommandSpec::text(format!("DROP PROCEDURE {proc}")))
            .await?;
        Ok::<(), SqlAccessError>(())
    })?;
    Ok(())
}

#[test]
fn mssql_streaming_reader() -> Result<(), Box<dyn std::error::Error>> {
    let Some(db) = manager() else {
        return Ok(());
    };
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut reader = db
            .get_reader(
                CommandSpec::text(
                    "SELECT TOP (@n) ROW_NUMBER() OVER (ORDER BY (SELECT NULL)) AS n FROM sys.all_columns",
                )
                .param("@n", 250_i64),
            )
            .await?;
        assert_eq!(reader.columns(), ["n"]);
        let mut seen = 0;
        while let Some(row) = reader.next_row().await? {
            seen += 1;
            assert_eq!(row.get("n"), Some(&RowValues::Int(seen)));
        }
        assert_eq!(seen, 250);
        Ok::<(), SqlAccessError>(())
    })?;
    Ok(())
}

#[test]
fn mssql_connection_closes_twice() -> Result<(), Box<dyn std::error::Error>> {
    let Some(db) = manager() else {
        return Ok(());
    };
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut conn = db.open_connection().await?;
        assert_eq!(conn.status(), ConnectionStatus::Open);
        db.close_connection(&mut conn).await;
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        db.close_connection(&mut conn).await;
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        Ok::<(), SqlAccessError>(())
    })?;
    Ok(())
}
