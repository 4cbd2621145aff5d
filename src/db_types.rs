//! Parameter type tags.
//!
//! A tag is either generic ([`DbType`]), valid for every provider, or specific to one
//! backend. Generic tags are resolved to the provider's native type when a parameter
//! is built; a backend-specific tag used against another provider is rejected there.

use std::fmt;

use crate::error::SqlAccessError;
use crate::types::ProviderIdentity;

/// Provider-neutral parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    AnsiString,
    String,
    Boolean,
    Byte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    Currency,
    Date,
    DateTime,
    Guid,
    Binary,
    Xml,
    Json,
}

/// Native SQL Server column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlServerType {
    BigInt,
    Int,
    SmallInt,
    TinyInt,
    Bit,
    Float,
    Real,
    Decimal,
    Money,
    NVarChar,
    VarChar,
    NChar,
    Char,
    NText,
    Text,
    Date,
    DateTime,
    DateTime2,
    UniqueIdentifier,
    VarBinary,
    Xml,
}

/// Native `PostgreSQL` column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostgresType {
    Bigint,
    Integer,
    Smallint,
    Boolean,
    Double,
    Real,
    Numeric,
    Money,
    Text,
    Varchar,
    Char,
    Date,
    Timestamp,
    TimestampTz,
    Uuid,
    Bytea,
    Xml,
    Json,
    Jsonb,
}

/// Native `MySQL` column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MySqlType {
    Int64,
    Int32,
    Int24,
    Int16,
    Byte,
    Bit,
    Double,
    Float,
    Decimal,
    VarChar,
    String,
    Text,
    Date,
    DateTime,
    Timestamp,
    Guid,
    Blob,
    Json,
}

/// Type information attached to a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeTag {
    /// Let the backend infer the type from the value.
    #[default]
    Inferred,
    Generic(DbType),
    SqlServer(SqlServerType),
    Postgres(PostgresType),
    MySql(MySqlType),
}

/// The shape a parameter value is coerced to before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueClass {
    Integer { min: i64, max: i64 },
    Float,
    Decimal,
    Text,
    Bool,
    Date,
    Timestamp,
    Guid,
    Binary,
    Json,
}

const fn int(min: i64, max: i64) -> ValueClass {
    ValueClass::Integer { min, max }
}

impl SqlServerType {
    pub(crate) fn value_class(self) -> ValueClass {
        match self {
            SqlServerType::BigInt => int(i64::MIN, i64::MAX),
            SqlServerType::Int => int(i32::MIN.into(), i32::MAX.into()),
            SqlServerType::SmallInt => int(i16::MIN.into(), i16::MAX.into()),
            SqlServerType::TinyInt => int(0, 255),
            SqlServerType::Bit => ValueClass::Bool,
            SqlServerType::Float | SqlServerType::Real => ValueClass::Float,
            SqlServerType::Decimal | SqlServerType::Money => ValueClass::Decimal,
            SqlServerType::NVarChar
            | SqlServerType::VarChar
            | SqlServerType::NChar
            | SqlServerType::Char
            | SqlServerType::NText
            | SqlServerType::Text
            | SqlServerType::Xml => ValueClass::Text,
            SqlServerType::Date => ValueClass::Date,
            SqlServerType::DateTime | SqlServerType::DateTime2 => ValueClass::Timestamp,
            SqlServerType::UniqueIdentifier => ValueClass::Guid,
            SqlServerType::VarBinary => ValueClass::Binary,
        }
    }
}

impl PostgresType {
    pub(crate) fn value_class(self) -> ValueClass {
        match self {
            PostgresType::Bigint => int(i64::MIN, i64::MAX),
            PostgresType::Integer => int(i32::MIN.into(), i32::MAX.into()),
            PostgresType::Smallint => int(i16::MIN.into(), i16::MAX.into()),
            PostgresType::Boolean => ValueClass::Bool,
            PostgresType::Double | PostgresType::Real => ValueClass::Float,
            PostgresType::Numeric | PostgresType::Money => ValueClass::Decimal,
            PostgresType::Text | PostgresType::Varchar | PostgresType::Char | PostgresType::Xml => {
                ValueClass::Text
            }
            PostgresType::Date => ValueClass::Date,
            PostgresType::Timestamp | PostgresType::TimestampTz => ValueClass::Timestamp,
            PostgresType::Uuid => ValueClass::Guid,
            PostgresType::Bytea => ValueClass::Binary,
            PostgresType::Json | PostgresType::Jsonb => ValueClass::Json,
        }
    }
}

impl MySqlType {
    pub(crate) fn value_class(self) -> ValueClass {
        match self {
            MySqlType::Int64 => int(i64::MIN, i64::MAX),
            MySqlType::Int32 => int(i32::MIN.into(), i32::MAX.into()),
            MySqlType::Int24 => int(-8_388_608, 8_388_607),
            MySqlType::Int16 => int(i16::MIN.into(), i16::MAX.into()),
            MySqlType::Byte => int(i8::MIN.into(), i8::MAX.into()),
            MySqlType::Bit => ValueClass::Bool,
            MySqlType::Double | MySqlType::Float => ValueClass::Float,
            MySqlType::Decimal => ValueClass::Decimal,
            MySqlType::VarChar | MySqlType::String | MySqlType::Text => ValueClass::Text,
            MySqlType::Date => ValueClass::Date,
            MySqlType::DateTime | MySqlType::Timestamp => ValueClass::Timestamp,
            MySqlType::Guid => ValueClass::Guid,
            MySqlType::Blob => ValueClass::Binary,
            MySqlType::Json => ValueClass::Json,
        }
    }
}

impl DbType {
    #[must_use]
    pub fn to_sql_server(self) -> SqlServerType {
        match self {
            DbType::AnsiString => SqlServerType::VarChar,
            DbType::String => SqlServerType::NVarChar,
            DbType::Boolean => SqlServerType::Bit,
            DbType::Byte => SqlServerType::TinyInt,
            DbType::Int16 => SqlServerType::SmallInt,
            DbType::Int32 => SqlServerType::Int,
            DbType::Int64 => SqlServerType::BigInt,
            DbType::Single => SqlServerType::Real,
            DbType::Double => SqlServerType::Float,
            DbType::Decimal => SqlServerType::Decimal,
            DbType::Currency => SqlServerType::Money,
            DbType::Date => SqlServerType::Date,
            DbType::DateTime => SqlServerType::DateTime2,
            DbType::Guid => SqlServerType::UniqueIdentifier,
            DbType::Binary => SqlServerType::VarBinary,
            DbType::Xml => SqlServerType::Xml,
            DbType::Json => SqlServerType::NVarChar,
        }
    }

    #[must_use]
    pub fn to_postgres(self) -> PostgresType {
        match self {
            DbType::AnsiString | DbType::String => PostgresType::Text,
            DbType::Boolean => PostgresType::Boolean,
            // no unsigned single-byte type in PostgreSQL
            DbType::Byte | DbType::Int16 => PostgresType::Smallint,
            DbType::Int32 => PostgresType::Integer,
            DbType::Int64 => PostgresType::Bigint,
            DbType::Single => PostgresType::Real,
            DbType::Double => PostgresType::Double,
            DbType::Decimal => PostgresType::Numeric,
            DbType::Currency => PostgresType::Money,
            DbType::Date => PostgresType::Date,
            DbType::DateTime => PostgresType::Timestamp,
            DbType::Guid => PostgresType::Uuid,
            DbType::Binary => PostgresType::Bytea,
            DbType::Xml => PostgresType::Xml,
            DbType::Json => PostgresType::Jsonb,
        }
    }

    #[must_use]
    pub fn to_mysql(self) -> MySqlType {
        match self {
            DbType::AnsiString | DbType::String | DbType::Xml => MySqlType::VarChar,
            DbType::Boolean => MySqlType::Bit,
            DbType::Byte | DbType::Int16 => MySqlType::Int16,
            DbType::Int32 => MySqlType::Int32,
            DbType::Int64 => MySqlType::Int64,
            DbType::Single => MySqlType::Float,
            DbType::Double => MySqlType::Double,
            DbType::Decimal | DbType::Currency => MySqlType::Decimal,
            DbType::Date => MySqlType::Date,
            DbType::DateTime => MySqlType::DateTime,
            DbType::Guid => MySqlType::Guid,
            DbType::Binary => MySqlType::Blob,
            DbType::Json => MySqlType::Json,
        }
    }
}

impl TypeTag {
    /// The provider a backend-specific tag belongs to; `None` for generic and inferred tags.
    #[must_use]
    pub fn provider(self) -> Option<ProviderIdentity> {
        match self {
            TypeTag::Inferred | TypeTag::Generic(_) => None,
            TypeTag::SqlServer(_) => Some(ProviderIdentity::SqlServer),
            TypeTag::Postgres(_) => Some(ProviderIdentity::PostgreSql),
            TypeTag::MySql(_) => Some(ProviderIdentity::MySql),
        }
    }

    /// Resolve the tag for `provider`: generic tags become the provider's native type,
    /// inferred tags stay inferred.
    ///
    /// # Errors
    /// Returns `SqlAccessError::UnsupportedProvider` naming this tag when it belongs to a
    /// different provider.
    pub fn resolve_for(self, provider: ProviderIdentity) -> Result<TypeTag, SqlAccessError> {
        match (self, provider) {
            (TypeTag::Inferred, _) => Ok(TypeTag::Inferred),
            (TypeTag::Generic(db), ProviderIdentity::SqlServer) => {
                Ok(TypeTag::SqlServer(db.to_sql_server()))
            }
            (TypeTag::Generic(db), ProviderIdentity::PostgreSql) => {
                Ok(TypeTag::Postgres(db.to_postgres()))
            }
            (TypeTag::Generic(db), ProviderIdentity::MySql) => Ok(TypeTag::MySql(db.to_mysql())),
            (tag, provider) if tag.provider() == Some(provider) => Ok(tag),
            (tag, provider) => Err(SqlAccessError::UnsupportedProvider {
                provider: provider.provider_name().to_string(),
                requested: Some(tag.to_string()),
            }),
        }
    }

    pub(crate) fn value_class(self) -> Option<ValueClass> {
        match self {
            TypeTag::Inferred => None,
            TypeTag::Generic(db) => Some(db.to_sql_server().value_class()),
            TypeTag::SqlServer(t) => Some(t.value_class()),
            TypeTag::Postgres(t) => Some(t.value_class()),
            TypeTag::MySql(t) => Some(t.value_class()),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Inferred => f.write_str("Inferred"),
            TypeTag::Generic(t) => write!(f, "DbType::{t:?}"),
            TypeTag::SqlServer(t) => write!(f, "SqlServerType::{t:?}"),
            TypeTag::Postgres(t) => write!(f, "PostgresType::{t:?}"),
            TypeTag::MySql(t) => write!(f, "MySqlType::{t:?}"),
        }
    }
}

impl From<DbType> for TypeTag {
    fn from(value: DbType) -> Self {
        TypeTag::Generic(value)
    }
}

impl From<SqlServerType> for TypeTag {
    fn from(value: SqlServerType) -> Self {
        TypeTag::SqlServer(value)
    }
}

impl From<PostgresType> for TypeTag {
    fn from(value: PostgresType) -> Self {
        TypeTag::Postgres(value)
    }
}

impl From<MySqlType> for TypeTag {
    fn from(value: MySqlType) -> Self {
        TypeTag::MySql(value)
    }
}
