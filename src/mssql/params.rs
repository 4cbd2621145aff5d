use tiberius::Query;

use crate::db_types::{SqlServerType, TypeTag};
use crate::params::Parameter;
use crate::types::{ParameterDirection, RowValues};

/// T-SQL type used to declare a parameter's local variable; `bound` is the value
/// that will be sent for it.
pub(crate) fn declared_type(param: &Parameter, bound: &RowValues) -> String {
    let size = param.size();
    match param.type_tag() {
        TypeTag::SqlServer(t) => sql_server_type(t, size, bound),
        // procedure return codes are always INT
        _ if param.direction() == ParameterDirection::ReturnValue => "INT".into(),
        _ => inferred_type(bound),
    }
}

fn sized(name: &str, size: Option<u32>, max_inline: u32) -> String {
    match size {
        Some(n) if n > 0 && n <= max_inline => format!("{name}({n})"),
        _ => format!("{name}(MAX)"),
    }
}

fn fixed(name: &str, size: Option<u32>, value: &RowValues) -> String {
    let len = size
        .or_else(|| {
            value
                .as_text()
                .and_then(|s| u32::try_from(s.chars().count()).ok())
        })
        .unwrap_or(1)
        .max(1);
    format!("{name}({len})")
}

fn decimal_scale(value: &RowValues) -> usize {
    value
        .as_text()
        .and_then(|s| s.split_once('.'))
        .map_or(0, |(_, frac)| frac.len())
}

fn sql_server_type(t: SqlServerType, size: Option<u32>, value: &RowValues) -> String {
    match t {
        SqlServerType::BigInt => "BIGINT".into(),
        SqlServerType::Int => "INT".into(),
        SqlServerType::SmallInt => "SMALLINT".into(),
        SqlServerType::TinyInt => "TINYINT".into(),
        SqlServerType::Bit => "BIT".into(),
        SqlServerType::Float => "FLOAT".into(),
        SqlServerType::Real => "REAL".into(),
        SqlServerType::Decimal => {
            // outputs carry no value; give them room for a fractional part
            let scale = if value.is_null() {
                10
            } else {
                decimal_scale(value).min(38)
            };
            format!("DECIMAL(38, {scale})")
        }
        SqlServerType::Money => "MONEY".into(),
        // text/ntext cannot be local variables
        SqlServerType::NVarChar | SqlServerType::NText => sized("NVARCHAR", size, 4000),
        SqlServerType::VarChar | SqlServerType::Text => sized("VARCHAR", size, 8000),
        SqlServerType::NChar => fixed("NCHAR", size, value),
        SqlServerType::Char => fixed("CHAR", size, value),
        SqlServerType::Date => "DATE".into(),
        SqlServerType::DateTime => "DATETIME".into(),
        SqlServerType::DateTime2 => "DATETIME2".into(),
        SqlServerType::UniqueIdentifier => "UNIQUEIDENTIFIER".into(),
        SqlServerType::VarBinary => sized("VARBINARY", size, 8000),
        SqlServerType::Xml => "XML".into(),
    }
}

fn inferred_type(value: &RowValues) -> String {
    match value {
        RowValues::Int(_) => "BIGINT",
        RowValues::Float(_) => "FLOAT",
        RowValues::Bool(_) => "BIT",
        RowValues::Timestamp(_) => "DATETIME2",
        RowValues::Date(_) => "DATE",
        RowValues::Blob(_) => "VARBINARY(MAX)",
        RowValues::Text(_) | RowValues::JSON(_) | RowValues::Null => "NVARCHAR(MAX)",
    }
    .to_string()
}

/// Bind a parameter value to the next `@Pn` slot of the query.
pub(crate) fn bind_value(query: &mut Query<'_>, value: &RowValues) {
    match value {
        RowValues::Int(i) => query.bind(*i),
        RowValues::Float(f) => query.bind(*f),
        RowValues::Text(s) => query.bind(s.clone()),
        RowValues::Bool(b) => query.bind(*b),
        RowValues::Timestamp(dt) => query.bind(*dt),
        RowValues::Date(d) => query.bind(*d),
        RowValues::Null => query.bind(Option::<String>::None),
        RowValues::JSON(jsval) => query.bind(jsval.to_string()),
        RowValues::Blob(bytes) => query.bind(bytes.clone()),
    }
}

/// Quote a possibly schema-qualified name: `dbo.Orders` -> `[dbo].[Orders]`.
pub(crate) fn quote_name(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim();
            if part.starts_with('[') && part.ends_with(']') && part.len() >= 2 {
                part.to_string()
            } else {
                format!("[{}]", part.replace(']', "]]"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_types::DbType;
    use crate::params::ParameterBuilder;
    use crate::types::ProviderIdentity;

    fn builder() -> ParameterBuilder {
        ParameterBuilder::new(ProviderIdentity::SqlServer)
    }

    fn declared(p: &Parameter) -> String {
        declared_type(p, &p.bind_value().unwrap())
    }

    #[test]
    fn declares_sized_and_generic_types() {
        let p = builder()
            .sized("name", 50, "x", DbType::String, ParameterDirection::Input)
            .unwrap();
        assert_eq!(declared(&p), "NVARCHAR(50)");
        let p = builder()
            .generic("price", "19.995", DbType::Decimal, ParameterDirection::Input)
            .unwrap();
        assert_eq!(declared(&p), "DECIMAL(38, 3)");
        let p = builder()
            .typed_only("id", DbType::Int32, ParameterDirection::Output)
            .unwrap();
        assert_eq!(declared(&p), "INT");
        let p = builder()
            .specific("notes", "a", SqlServerType::NText, ParameterDirection::Input)
            .unwrap();
        assert_eq!(declared(&p), "NVARCHAR(MAX)");
        let p = builder()
            .specific("rate", 2.25, SqlServerType::Decimal, ParameterDirection::Input)
            .unwrap();
        assert_eq!(declared(&p), "DECIMAL(38, 2)");
        let p = builder()
            .specific("code", 1234_i64, SqlServerType::Char, ParameterDirection::Input)
            .unwrap();
        assert_eq!(declared(&p), "CHAR(4)");
    }

    #[test]
    fn inferred_types_follow_the_value() {
        let p = builder()
            .value_only("flag", true, ParameterDirection::Input)
            .unwrap();
        assert_eq!(declared(&p), "BIT");
        let p = builder()
            .value_only("missing", RowValues::Null, ParameterDirection::Input)
            .unwrap();
        assert_eq!(declared(&p), "NVARCHAR(MAX)");
    }

    #[test]
    fn quotes_qualified_names() {
        assert_eq!(quote_name("dbo.Orders"), "[dbo].[Orders]");
        assert_eq!(quote_name("[sales].Order]s"), "[sales].[Order]]s]");
    }
}
