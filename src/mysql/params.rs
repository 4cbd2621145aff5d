use sqlx::mysql::{MySql, MySqlArguments};
use sqlx::query::Query;
use sqlx::types::Json;

use crate::types::RowValues;

pub(crate) type MysqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

/// Bind one value to the next `?`.
///
/// Decimals and GUIDs arrive as text and are converted by the server.
pub(crate) fn bind_value<'q>(query: MysqlQuery<'q>, value: RowValues) -> MysqlQuery<'q> {
    match value {
        RowValues::Int(i) => query.bind(i),
        RowValues::Float(f) => query.bind(f),
        RowValues::Text(s) => query.bind(s),
        RowValues::Bool(b) => query.bind(b),
        RowValues::Timestamp(ts) => query.bind(ts),
        RowValues::Date(d) => query.bind(d),
        RowValues::Null => query.bind(Option::<String>::None),
        RowValues::JSON(j) => query.bind(Json(j)),
        RowValues::Blob(bytes) => query.bind(bytes),
    }
}

/// Quote a possibly schema-qualified name: `shop.orders` -> `` `shop`.`orders` ``.
pub(crate) fn quote_name(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim();
            if part.len() >= 2 && part.starts_with('`') && part.ends_with('`') {
                part.to_string()
            } else {
                format!("`{}`", part.replace('`', "``"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Session variable that stages an output parameter across `CALL`.
pub(crate) fn session_var(name: &str) -> String {
    format!("@_sal_{name}")
}
