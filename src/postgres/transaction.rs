use tokio_postgres::Client;

use crate::error::SqlAccessError;
use crate::types::IsolationLevel;

fn begin_statement(isolation: Option<IsolationLevel>) -> String {
    match isolation {
        // PostgreSQL's REPEATABLE READ is snapshot isolation
        Some(IsolationLevel::Snapshot) => "BEGIN ISOLATION LEVEL REPEATABLE READ".to_string(),
        Some(level) => format!("BEGIN ISOLATION LEVEL {}", level.ansi_name()),
        None => "BEGIN".to_string(),
    }
}

/// # Errors
/// Returns the tokio-postgres error if the statement fails.
pub(crate) async fn begin(
    client: &Client,
    isolation: Option<IsolationLevel>,
) -> Result<(), SqlAccessError> {
    client.batch_execute(&begin_statement(isolation)).await?;
    Ok(())
}

pub(crate) async fn commit(client: &Client) -> Result<(), SqlAccessError> {
    client.batch_execute("COMMIT").await?;
    Ok(())
}

pub(crate) async fn rollback(client: &Client) -> Result<(), SqlAccessError> {
    client.batch_execute("ROLLBACK").await?;
    Ok(())
}
