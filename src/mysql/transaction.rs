use sqlx::Executor;
use sqlx::mysql::MySqlConnection;

use crate::error::SqlAccessError;
use crate::types::IsolationLevel;

/// Statements that open a transaction at the requested level.
fn begin_statements(isolation: Option<IsolationLevel>) -> Vec<String> {
    match isolation {
        // InnoDB snapshots are repeatable-read plus an immediately taken read view
        Some(IsolationLevel::Snapshot) => vec![
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ".to_string(),
            "START TRANSACTION WITH CONSISTENT SNAPSHOT".to_string(),
        ],
        Some(level) => vec![
            format!("SET TRANSACTION ISOLATION LEVEL {}", level.ansi_name()),
            "START TRANSACTION".to_string(),
        ],
        None => vec!["START TRANSACTION".to_string()],
    }
}

/// # Errors
/// Returns the sqlx error if a statement fails.
pub(crate) async fn begin(
    conn: &mut MySqlConnection,
    isolation: Option<IsolationLevel>,
) -> Result<(), SqlAccessError> {
    for sql in begin_statements(isolation) {
        (&mut *conn).execute(sql.as_str()).await?;
    }
    Ok(())
}

pub(crate) async fn commit(conn: &mut MySqlConnection) -> Result<(), SqlAccessError> {
    conn.execute("COMMIT").await?;
    Ok(())
}

pub(crate) async fn rollback(conn: &mut MySqlConnection) -> Result<(), SqlAccessError> {
    conn.execute("ROLLBACK").await?;
    Ok(())
}
