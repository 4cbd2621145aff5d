use std::error::Error;

use bytes::{BufMut, BytesMut};
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};

use crate::db_types::{PostgresType, TypeTag};
use crate::params::Parameter;
use crate::types::RowValues;

type BoxError = Box<dyn Error + Sync + Send>;

/// Declared type for `prepare_typed`, when the parameter carries one.
pub(crate) fn declared_type(param: &Parameter) -> Option<Type> {
    match param.type_tag() {
        TypeTag::Postgres(t) => Some(pg_type(t)),
        _ => None,
    }
}

fn pg_type(t: PostgresType) -> Type {
    match t {
        PostgresType::Bigint => Type::INT8,
        PostgresType::Integer => Type::INT4,
        PostgresType::Smallint => Type::INT2,
        PostgresType::Boolean => Type::BOOL,
        PostgresType::Double => Type::FLOAT8,
        PostgresType::Real => Type::FLOAT4,
        // money has an assignment cast from numeric
        PostgresType::Numeric | PostgresType::Money => Type::NUMERIC,
        PostgresType::Text => Type::TEXT,
        PostgresType::Varchar => Type::VARCHAR,
        PostgresType::Char => Type::BPCHAR,
        PostgresType::Date => Type::DATE,
        PostgresType::Timestamp => Type::TIMESTAMP,
        PostgresType::TimestampTz => Type::TIMESTAMPTZ,
        PostgresType::Uuid => Type::UUID,
        PostgresType::Bytea => Type::BYTEA,
        PostgresType::Xml => Type::XML,
        PostgresType::Json => Type::JSON,
        PostgresType::Jsonb => Type::JSONB,
    }
}

fn cannot_bind(value: &RowValues, ty: &Type) -> BoxError {
    format!("cannot bind {} value as {}", value.type_name(), ty.name()).into()
}

fn integral(value: &RowValues) -> Option<i64> {
    match value {
        RowValues::Int(i) => Some(*i),
        RowValues::Bool(b) => Some(i64::from(*b)),
        #[allow(clippy::cast_possible_truncation)]
        RowValues::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Some(*f as i64),
        RowValues::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn floating(value: &RowValues) -> Option<f64> {
    match value {
        RowValues::Float(f) => Some(*f),
        #[allow(clippy::cast_precision_loss)]
        RowValues::Int(i) => Some(*i as f64),
        RowValues::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &RowValues) -> Option<String> {
    match value {
        RowValues::Text(s) => Some(s.clone()),
        RowValues::Int(i) => Some(i.to_string()),
        RowValues::Float(f) => Some(f.to_string()),
        RowValues::Bool(b) => Some(b.to_string()),
        RowValues::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        RowValues::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        RowValues::JSON(j) => Some(j.to_string()),
        RowValues::Null | RowValues::Blob(_) => None,
    }
}

/// Binds by the parameter type the server reports, converting between compatible
/// shapes (`Int` into `int2`, `Text` into `uuid`, decimals into `numeric`).
impl ToSql for RowValues {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        match *ty {
            Type::BOOL => match self {
                RowValues::Bool(b) => b.to_sql(ty, out),
                other => match integral(other) {
                    Some(n) => (n != 0).to_sql(ty, out),
                    None => Err(cannot_bind(self, ty)),
                },
            },
            Type::INT2 => {
                let n = integral(self).ok_or_else(|| cannot_bind(self, ty))?;
                i16::try_from(n)?.to_sql(ty, out)
            }
            Type::INT4 => {
                let n = integral(self).ok_or_else(|| cannot_bind(self, ty))?;
                i32::try_from(n)?.to_sql(ty, out)
            }
            Type::INT8 => integral(self)
                .ok_or_else(|| cannot_bind(self, ty))?
                .to_sql(ty, out),
            Type::OID => {
                let n = integral(self).ok_or_else(|| cannot_bind(self, ty))?;
                u32::try_from(n)?.to_sql(ty, out)
            }
            #[allow(clippy::cast_possible_truncation)]
            Type::FLOAT4 => match floating(self) {
                Some(f) => (f as f32).to_sql(ty, out),
                None => Err(cannot_bind(self, ty)),
            },
            Type::FLOAT8 => match floating(self) {
                Some(f) => f.to_sql(ty, out),
                None => Err(cannot_bind(self, ty)),
            },
            Type::NUMERIC => {
                let text = match self {
                    RowValues::Int(_) | RowValues::Float(_) | RowValues::Text(_) => {
                        as_text(self).unwrap_or_default()
                    }
                    _ => return Err(cannot_bind(self, ty)),
                };
                encode_numeric(text.trim(), out)?;
                Ok(IsNull::No)
            }
            Type::DATE => match self {
                RowValues::Date(d) => d.to_sql(ty, out),
                other => match other.as_timestamp() {
                    Some(ts) => ts.date().to_sql(ty, out),
                    None => Err(cannot_bind(self, ty)),
                },
            },
            Type::TIMESTAMP => match self.as_timestamp() {
                Some(ts) => ts.to_sql(ty, out),
                None => Err(cannot_bind(self, ty)),
            },
            Type::TIMESTAMPTZ => match self.as_timestamp() {
                Some(ts) => ts.and_utc().to_sql(ty, out),
                None => Err(cannot_bind(self, ty)),
            },
            Type::UUID => {
                let id = match self {
                    RowValues::Text(s) => uuid::Uuid::parse_str(s.trim())?,
                    RowValues::Blob(b) => uuid::Uuid::from_slice(b)?,
                    _ => return Err(cannot_bind(self, ty)),
                };
                id.to_sql(ty, out)
            }
            Type::JSON | Type::JSONB => {
                let json = match self {
                    RowValues::JSON(j) => j.clone(),
                    RowValues::Text(s) => serde_json::from_str(s)?,
                    other => crate::mapper::row_value_to_json(other),
                };
                json.to_sql(ty, out)
            }
            Type::BYTEA => match self {
                RowValues::Blob(b) => b.as_slice().to_sql(ty, out),
                RowValues::Text(s) => s.as_bytes().to_sql(ty, out),
                _ => Err(cannot_bind(self, ty)),
            },
            // text, varchar, bpchar, name, xml, enums and anything else whose binary
            // form is its text form
            _ => match as_text(self) {
                Some(text) => {
                    out.put_slice(text.as_bytes());
                    Ok(IsNull::No)
                }
                None => Err(cannot_bind(self, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Write a decimal literal in the binary `numeric` format: base-10000 digit groups
/// with a weight, sign and display scale.
pub(crate) fn encode_numeric(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit())
    {
        return Err(format!("'{text}' is not a decimal number").into());
    }

    let int_part = int_part.trim_start_matches('0');
    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let int_digits: String = "0".repeat(int_pad) + int_part;
    let frac_digits: String = frac_part.to_string() + &"0".repeat(frac_pad);

    let mut groups: Vec<i16> = Vec::new();
    for chunk in int_digits.as_bytes().chunks(4).chain(frac_digits.as_bytes().chunks(4)) {
        let group = chunk
            .iter()
            .fold(0_i16, |acc, b| acc * 10 + i16::from(b - b'0'));
        groups.push(group);
    }
    let mut weight = i16::try_from(int_digits.len() / 4)? - 1;

    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= i16::try_from(leading)?;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    let sign: u16 = if negative && !groups.is_empty() { 0x4000 } else { 0 };
    out.put_i16(i16::try_from(groups.len())?);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(u16::try_from(frac_part.len())?);
    for g in groups {
        out.put_i16(g);
    }
    Ok(())
}

/// Binary `numeric` decoded to its exact decimal text.
pub(crate) struct PgNumeric(pub(crate) String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() < 8 {
            return Err("numeric value is truncated".into());
        }
        let word = |i: usize| [raw[i], raw[i + 1]];
        let ndigits = usize::from(u16::from_be_bytes(word(0)));
        let weight = i32::from(i16::from_be_bytes(word(2)));
        let sign = u16::from_be_bytes(word(4));
        let dscale = usize::from(u16::from_be_bytes(word(6)));
        if raw.len() < 8 + ndigits * 2 {
            return Err("numeric value is truncated".into());
        }
        match sign {
            0xC000 => return Ok(PgNumeric("NaN".into())),
            0xD000 => return Ok(PgNumeric("Infinity".into())),
            0xF000 => return Ok(PgNumeric("-Infinity".into())),
            _ => {}
        }
        let digits: Vec<u16> = (0..ndigits)
            .map(|i| u16::from_be_bytes(word(8 + i * 2)))
            .collect();
        // the group worth 10000^power
        let group = |power: i32| -> u16 {
            usize::try_from(weight - power)
                .ok()
                .and_then(|i| digits.get(i).copied())
                .unwrap_or(0)
        };

        let mut text = String::new();
        if sign == 0x4000 {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            text.push_str(&group(weight).to_string());
            for power in (0..weight).rev() {
                text.push_str(&format!("{:04}", group(power)));
            }
        }
        if dscale > 0 {
            let mut frac = String::new();
            let mut power = -1;
            while frac.len() < dscale {
                frac.push_str(&format!("{:04}", group(power)));
                power -= 1;
            }
            frac.truncate(dscale);
            text.push('.');
            text.push_str(&frac);
        }
        Ok(PgNumeric(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Raw column bytes read as UTF-8, for types without a dedicated conversion.
pub(crate) struct LossyText(pub(crate) String);

impl<'a> FromSql<'a> for LossyText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(LossyText(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(text: &str) -> String {
        let mut buf = BytesMut::new();
        encode_numeric(text, &mut buf).unwrap();
        PgNumeric::from_sql(&Type::NUMERIC, &buf).unwrap().0
    }

    #[test]
    fn numeric_encoding_matches_server_format() {
        let mut buf = BytesMut::new();
        encode_numeric("12345.678", &mut buf).unwrap();
        // ndigits=3, weight=1, sign=+, dscale=3, digits 1 2345 6780
        assert_eq!(
            buf.as_ref(),
            &[0, 3, 0, 1, 0, 0, 0, 3, 0, 1, 0x09, 0x29, 0x1A, 0x7C]
        );
    }

    #[test]
    fn numeric_text_survives_encoding() {
        assert_eq!(round_trip("0.05"), "0.05");
        assert_eq!(round_trip("-19.995"), "-19.995");
        assert_eq!(round_trip("100000000"), "100000000");
        assert_eq!(round_trip("0.00005"), "0.00005");
        assert_eq!(round_trip("0"), "0");
        assert_eq!(round_trip("7.10"), "7.10");
    }

    #[test]
    fn numeric_rejects_garbage() {
        let mut buf = BytesMut::new();
        assert!(encode_numeric("12a", &mut buf).is_err());
        assert!(encode_numeric("", &mut buf).is_err());
    }

    #[test]
    fn integers_narrow_to_the_declared_width() {
        let mut buf = BytesMut::new();
        RowValues::Int(7).to_sql(&Type::INT2, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0, 7]);
        let mut buf = BytesMut::new();
        assert!(RowValues::Int(70_000).to_sql(&Type::INT2, &mut buf).is_err());
        let mut buf = BytesMut::new();
        RowValues::Text("42".into())
            .to_sql(&Type::INT4, &mut buf)
            .unwrap();
        assert_eq!(buf.as_ref(), &[0, 0, 0, 42]);
    }

    #[test]
    fn text_types_take_the_text_form() {
        let mut buf = BytesMut::new();
        let is_null = RowValues::Int(5).to_sql(&Type::TEXT, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(buf.as_ref(), b"5");
        let mut buf = BytesMut::new();
        assert!(matches!(
            RowValues::Null.to_sql(&Type::INT4, &mut buf).unwrap(),
            IsNull::Yes
        ));
    }
}
