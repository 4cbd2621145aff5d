use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::db_types::{DbType, TypeTag, ValueClass};
use crate::error::SqlAccessError;
use crate::types::{ParameterDirection, ProviderIdentity, RowValues, parse_timestamp};

/// A parameter as the caller describes it, before it is bound to a provider.
///
/// ```rust
/// use sql_access_layer::prelude::*;
///
/// let id = ParameterSpec::new("@id", 42_i64).typed(DbType::Int32);
/// let name = ParameterSpec::new("name", "widget").size(50);
/// let new_id = ParameterSpec::output("new_id", DbType::Int64);
/// # let _ = (id, name, new_id);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub value: RowValues,
    pub type_tag: TypeTag,
    pub direction: ParameterDirection,
    pub size: Option<u32>,
}

impl ParameterSpec {
    /// Input parameter whose type is inferred from the value.
    pub fn new(name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            type_tag: TypeTag::Inferred,
            direction: ParameterDirection::Input,
            size: None,
        }
    }

    /// Output parameter; the value is read back after execution.
    pub fn output(name: impl Into<String>, type_tag: impl Into<TypeTag>) -> Self {
        Self {
            name: name.into(),
            value: RowValues::Null,
            type_tag: type_tag.into(),
            direction: ParameterDirection::Output,
            size: None,
        }
    }

    /// Return value of a stored procedure or function.
    pub fn return_value(name: impl Into<String>, type_tag: impl Into<TypeTag>) -> Self {
        Self {
            direction: ParameterDirection::ReturnValue,
            ..Self::output(name, type_tag)
        }
    }

    #[must_use]
    pub fn typed(mut self, type_tag: impl Into<TypeTag>) -> Self {
        self.type_tag = type_tag.into();
        self
    }

    #[must_use]
    pub fn direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }
}

/// A parameter bound to one provider: the name is normalized and the type tag resolved to
/// the provider's native type. The value is kept as the caller gave it; it is converted
/// to the shape the type expects only when the command is bound to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    provider: ProviderIdentity,
    name: String,
    value: RowValues,
    tag: TypeTag,
    direction: ParameterDirection,
    size: Option<u32>,
}

impl Parameter {
    #[must_use]
    pub fn provider(&self) -> ProviderIdentity {
        self.provider
    }

    /// Name without any `@`/`:` prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &RowValues {
        &self.value
    }

    /// Resolved tag: `Inferred` or the provider's own variant, never `Generic`.
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        self.tag
    }

    #[must_use]
    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }

    #[must_use]
    pub fn size(&self) -> Option<u32> {
        self.size
    }

    /// The value as it is sent to the driver: coerced to the type and truncated to the
    /// size. Output and return-value parameters send `Null`.
    pub(crate) fn bind_value(&self) -> Result<RowValues, SqlAccessError> {
        if !self.direction.is_input() {
            return Ok(RowValues::Null);
        }
        match self.tag.value_class() {
            Some(class) => coerce(&self.name, self.value.clone(), class, self.size),
            None => Ok(truncate(self.value.clone(), self.size)),
        }
    }
}

/// Builds provider-bound [`Parameter`]s.
///
/// A pure function of the provider; no connection is involved. This is the single
/// place where a type tag is checked against the provider.
#[derive(Debug, Clone, Copy)]
pub struct ParameterBuilder {
    provider: ProviderIdentity,
}

impl ParameterBuilder {
    #[must_use]
    pub fn new(provider: ProviderIdentity) -> Self {
        Self { provider }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderIdentity {
        self.provider
    }

    /// Bind one parameter description to this builder's provider.
    ///
    /// # Errors
    /// - `UnsupportedProvider` when the parameter carries another backend's type tag.
    /// - `ParameterError` for an invalid name, a name reserved by the provider or a value
    ///   that does not fit the type.
    ///
    /// The value, tag and direction are stored unchanged; the value is only checked here.
    pub fn build(&self, spec: &ParameterSpec) -> Result<Parameter, SqlAccessError> {
        let name = normalize_name(&spec.name)?;
        check_reserved(self.provider, &name)?;
        let tag = spec.type_tag.resolve_for(self.provider)?;
        let param = Parameter {
            provider: self.provider,
            name,
            value: spec.value.clone(),
            tag,
            direction: spec.direction,
            size: spec.size,
        };
        param.bind_value()?;
        Ok(param)
    }

    /// Bind every parameter of one command.
    ///
    /// # Errors
    /// Fails on the first parameter [`build`](Self::build) rejects, on duplicate names
    /// (compared case-insensitively) and on more than one return value.
    pub fn build_all(&self, specs: &[ParameterSpec]) -> Result<Vec<Parameter>, SqlAccessError> {
        let params = specs
            .iter()
            .map(|spec| self.build(spec))
            .collect::<Result<Vec<_>, _>>()?;
        check_unique(&params)?;
        debug!(provider = %self.provider, count = params.len(), "parameters built");
        Ok(params)
    }

    /// Parameter with a provider-neutral type.
    ///
    /// # Errors
    /// See [`build`](Self::build).
    pub fn generic(
        &self,
        name: &str,
        value: impl Into<RowValues>,
        db_type: DbType,
        direction: ParameterDirection,
    ) -> Result<Parameter, SqlAccessError> {
        self.build(&ParameterSpec::new(name, value).typed(db_type).direction(direction))
    }

    /// Parameter with a backend-specific type such as `SqlServerType::Money`.
    ///
    /// # Errors
    /// `UnsupportedProvider` when the tag belongs to another backend; otherwise see
    /// [`build`](Self::build).
    pub fn specific(
        &self,
        name: &str,
        value: impl Into<RowValues>,
        type_tag: impl Into<TypeTag>,
        direction: ParameterDirection,
    ) -> Result<Parameter, SqlAccessError> {
        self.build(&ParameterSpec::new(name, value).typed(type_tag).direction(direction))
    }

    /// Parameter with a provider-neutral type and a maximum size.
    ///
    /// # Errors
    /// See [`build`](Self::build).
    pub fn sized(
        &self,
        name: &str,
        size: u32,
        value: impl Into<RowValues>,
        db_type: DbType,
        direction: ParameterDirection,
    ) -> Result<Parameter, SqlAccessError> {
        self.build(
            &ParameterSpec::new(name, value)
                .typed(db_type)
                .size(size)
                .direction(direction),
        )
    }

    /// Parameter whose type is inferred from the value.
    ///
    /// # Errors
    /// See [`build`](Self::build).
    pub fn value_only(
        &self,
        name: &str,
        value: impl Into<RowValues>,
        direction: ParameterDirection,
    ) -> Result<Parameter, SqlAccessError> {
        self.build(&ParameterSpec::new(name, value).direction(direction))
    }

    /// Parameter with a type and no value, typically an output.
    ///
    /// # Errors
    /// See [`build`](Self::build).
    pub fn typed_only(
        &self,
        name: &str,
        type_tag: impl Into<TypeTag>,
        direction: ParameterDirection,
    ) -> Result<Parameter, SqlAccessError> {
        self.build(&ParameterSpec::output(name, type_tag).direction(direction))
    }
}

/// Values that can supply the parameters of a command, ORM style.
///
/// ```rust
/// use serde_json::json;
/// use sql_access_layer::prelude::*;
///
/// let spec = CommandSpec::text("SELECT * FROM orders WHERE id = @id AND state = @state")
///     .try_params(json!({ "id": 7, "state": "open" }))?;
/// assert_eq!(spec.parameters.len(), 2);
/// # Ok::<(), SqlAccessError>(())
/// ```
pub trait IntoParams {
    /// # Errors
    /// Returns `SqlAccessError::ParameterError` when the value cannot be read as a set of
    /// named parameters.
    fn into_params(self) -> Result<Vec<ParameterSpec>, SqlAccessError>;
}

impl IntoParams for () {
    fn into_params(self) -> Result<Vec<ParameterSpec>, SqlAccessError> {
        Ok(Vec::new())
    }
}

impl IntoParams for Vec<ParameterSpec> {
    fn into_params(self) -> Result<Vec<ParameterSpec>, SqlAccessError> {
        Ok(self)
    }
}

impl IntoParams for &[ParameterSpec] {
    fn into_params(self) -> Result<Vec<ParameterSpec>, SqlAccessError> {
        Ok(self.to_vec())
    }
}

impl<const N: usize> IntoParams for [ParameterSpec; N] {
    fn into_params(self) -> Result<Vec<ParameterSpec>, SqlAccessError> {
        Ok(self.into())
    }
}

/// Each key of a JSON object becomes an input parameter.
impl IntoParams for JsonValue {
    fn into_params(self) -> Result<Vec<ParameterSpec>, SqlAccessError> {
        match self {
            JsonValue::Null => Ok(Vec::new()),
            JsonValue::Object(map) => Ok(map
                .into_iter()
                .map(|(name, value)| ParameterSpec::new(name, json_to_row_value(value)))
                .collect()),
            other => Err(SqlAccessError::ParameterError(format!(
                "parameters must be a JSON object, got {other}"
            ))),
        }
    }
}

fn json_to_row_value(value: JsonValue) -> RowValues {
    match value {
        JsonValue::Null => RowValues::Null,
        JsonValue::Bool(b) => RowValues::Bool(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => RowValues::Int(i),
            None => n.as_f64().map_or(RowValues::Null, RowValues::Float),
        },
        JsonValue::String(s) => RowValues::Text(s),
        nested @ (JsonValue::Array(_) | JsonValue::Object(_)) => RowValues::JSON(nested),
    }
}

/// Reject duplicate names and more than one return value.
pub(crate) fn check_unique(params: &[Parameter]) -> Result<(), SqlAccessError> {
    for (i, param) in params.iter().enumerate() {
        if params[..i]
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(&param.name))
        {
            return Err(SqlAccessError::ParameterError(format!(
                "parameter '{}' is declared more than once",
                param.name
            )));
        }
    }
    let returns = params
        .iter()
        .filter(|p| p.direction == ParameterDirection::ReturnValue)
        .count();
    if returns > 1 {
        return Err(SqlAccessError::ParameterError(
            "a command can have at most one return-value parameter".into(),
        ));
    }
    Ok(())
}

/// Strip one leading `@`, `:` or `?` and validate the identifier.
pub(crate) fn normalize_name(raw: &str) -> Result<String, SqlAccessError> {
    let trimmed = raw.trim();
    let name = trimmed
        .strip_prefix(['@', ':', '?'])
        .unwrap_or(trimmed);
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SqlAccessError::ParameterError(format!(
            "'{raw}' is not a valid parameter name"
        )));
    }
    Ok(name.to_string())
}

/// SQL Server binds values as `@P1`, `@P2`, ...; a parameter of the same name would
/// collide with them inside the batch.
fn check_reserved(provider: ProviderIdentity, name: &str) -> Result<(), SqlAccessError> {
    let reserved = provider == ProviderIdentity::SqlServer
        && name
            .strip_prefix(['P', 'p'])
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    if reserved {
        return Err(SqlAccessError::ParameterError(format!(
            "parameter name '{name}' is reserved on SQL Server"
        )));
    }
    Ok(())
}

fn mismatch(name: &str, value: &RowValues, wanted: &str) -> SqlAccessError {
    SqlAccessError::ParameterError(format!(
        "parameter '{name}': cannot convert {} value to {wanted}",
        value.type_name()
    ))
}

fn truncate(value: RowValues, size: Option<u32>) -> RowValues {
    let Some(size) = size.and_then(|s| usize::try_from(s).ok()) else {
        return value;
    };
    match value {
        RowValues::Text(s) if s.chars().count() > size => {
            RowValues::Text(s.chars().take(size).collect())
        }
        RowValues::Blob(mut b) if b.len() > size => {
            b.truncate(size);
            RowValues::Blob(b)
        }
        other => other,
    }
}

fn is_decimal_literal(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    (!int_part.is_empty() || !frac_part.is_empty())
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.bytes().all(|b| b.is_ascii_digit())
}

/// Convert a value to the shape its type expects.
pub(crate) fn coerce(
    name: &str,
    value: RowValues,
    class: ValueClass,
    size: Option<u32>,
) -> Result<RowValues, SqlAccessError> {
    if value.is_null() {
        return Ok(RowValues::Null);
    }
    let coerced = match class {
        ValueClass::Integer { min, max } => {
            let n = match &value {
                RowValues::Int(i) => Some(*i),
                RowValues::Bool(b) => Some(i64::from(*b)),
                #[allow(clippy::cast_possible_truncation)]
                RowValues::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Some(*f as i64),
                RowValues::Text(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            match n {
                Some(n) if (min..=max).contains(&n) => RowValues::Int(n),
                Some(n) => {
                    return Err(SqlAccessError::ParameterError(format!(
                        "parameter '{name}': {n} is outside the range {min}..={max}"
                    )));
                }
                None => return Err(mismatch(name, &value, "an integer")),
            }
        }
        ValueClass::Float => match &value {
            RowValues::Float(f) => RowValues::Float(*f),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(i) => RowValues::Float(*i as f64),
            RowValues::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(RowValues::Float)
                .map_err(|_| mismatch(name, &value, "a floating point number"))?,
            _ => return Err(mismatch(name, &value, "a floating point number")),
        },
        ValueClass::Decimal => match &value {
            RowValues::Int(i) => RowValues::Text(i.to_string()),
            RowValues::Float(f) if f.is_finite() => RowValues::Text(f.to_string()),
            RowValues::Text(s) if is_decimal_literal(s.trim()) => {
                RowValues::Text(s.trim().to_string())
            }
            _ => return Err(mismatch(name, &value, "a decimal")),
        },
        ValueClass::Text => match value {
            RowValues::Text(s) => RowValues::Text(s),
            RowValues::Int(i) => RowValues::Text(i.to_string()),
            RowValues::Float(f) => RowValues::Text(f.to_string()),
            RowValues::Bool(b) => RowValues::Text(b.to_string()),
            RowValues::JSON(j) => RowValues::Text(j.to_string()),
            RowValues::Timestamp(ts) => {
                RowValues::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            RowValues::Date(d) => RowValues::Text(d.format("%Y-%m-%d").to_string()),
            other => return Err(mismatch(name, &other, "text")),
        },
        ValueClass::Bool => match &value {
            RowValues::Bool(b) => RowValues::Bool(*b),
            RowValues::Int(i) => RowValues::Bool(*i != 0),
            RowValues::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => RowValues::Bool(true),
                "false" | "0" => RowValues::Bool(false),
                _ => return Err(mismatch(name, &value, "a boolean")),
            },
            _ => return Err(mismatch(name, &value, "a boolean")),
        },
        ValueClass::Date => match &value {
            RowValues::Date(d) => RowValues::Date(*d),
            RowValues::Timestamp(ts) => RowValues::Date(ts.date()),
            RowValues::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_timestamp(s.trim()).map(|ts| ts.date()))
                .map(RowValues::Date)
                .ok_or_else(|| mismatch(name, &value, "a date"))?,
            _ => return Err(mismatch(name, &value, "a date")),
        },
        ValueClass::Timestamp => match value.as_timestamp() {
            Some(ts) => RowValues::Timestamp(ts),
            None => return Err(mismatch(name, &value, "a timestamp")),
        },
        ValueClass::Guid => {
            let parsed = match &value {
                RowValues::Text(s) => uuid::Uuid::parse_str(s.trim()).ok(),
                RowValues::Blob(b) => uuid::Uuid::from_slice(b).ok(),
                _ => None,
            };
            match parsed {
                Some(id) => RowValues::Text(id.hyphenated().to_string()),
                None => return Err(mismatch(name, &value, "a GUID")),
            }
        }
        ValueClass::Binary => match value {
            RowValues::Blob(b) => RowValues::Blob(b),
            other => return Err(mismatch(name, &other, "binary")),
        },
        ValueClass::Json => match value {
            RowValues::JSON(j) => RowValues::JSON(j),
            RowValues::Text(s) => serde_json::from_str::<JsonValue>(&s)
                .map(RowValues::JSON)
                .map_err(|e| {
                    SqlAccessError::ParameterError(format!(
                        "parameter '{name}': invalid JSON: {e}"
                    ))
                })?,
            RowValues::Int(i) => RowValues::JSON(JsonValue::from(i)),
            RowValues::Float(f) => RowValues::JSON(JsonValue::from(f)),
            RowValues::Bool(b) => RowValues::JSON(JsonValue::from(b)),
            other => return Err(mismatch(name, &other, "JSON")),
        },
    };
    Ok(truncate(coerced, size))
}
