use tiberius::Query;

use super::config::MssqlClient;
use crate::error::SqlAccessError;
use crate::types::IsolationLevel;

/// Begin a transaction on the session, optionally switching its isolation level first.
///
/// # Errors
/// Returns the tiberius error if the statement fails.
pub(crate) async fn begin(
    client: &mut MssqlClient,
    isolation: Option<IsolationLevel>,
) -> Result<(), SqlAccessError> {
    let sql = match isolation {
        Some(level) => format!(
            "SET TRANSACTION ISOLATION LEVEL {}; BEGIN TRANSACTION",
            level.ansi_name()
        ),
        None => "BEGIN TRANSACTION".to_string(),
    };
    Query::new(sql).execute(client).await?;
    Ok(())
}

pub(crate) async fn commit(client: &mut MssqlClient) -> Result<(), SqlAccessError> {
    Query::new("COMMIT TRANSACTION").execute(client).await?;
    Ok(())
}

/// Roll back if a transaction is still open; severe errors make the server abort it first.
pub(crate) async fn rollback(client: &mut MssqlClient) -> Result<(), SqlAccessError> {
    Query::new("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION")
        .execute(client)
        .await?;
    Ok(())
}
