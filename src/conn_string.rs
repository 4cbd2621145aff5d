//! ADO-style `Key=Value;` connection strings.
//!
//! Every backend accepts the ADO form, so the split into key/value pairs lives here and
//! each backend module maps the keys it understands onto its driver's config.

use std::time::Duration;

use crate::error::SqlAccessError;

/// Parsed `Key=Value;Key2=Value2` pairs. Keys are matched case-insensitively and
/// ignore interior whitespace (`User ID` == `userid`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdoConnectionString {
    pairs: Vec<(String, String)>,
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

impl AdoConnectionString {
    /// Split a connection string into pairs.
    ///
    /// Values may be quoted with `'` or `"` to include `;`; doubling the quote escapes it.
    ///
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` for a segment without `=` or an unterminated quote.
    pub fn parse(raw: &str) -> Result<Self, SqlAccessError> {
        let mut pairs = Vec::new();
        let mut chars = raw.chars().peekable();

        loop {
            let mut key = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' || c == ';' {
                    break;
                }
                key.push(c);
                chars.next();
            }
            match chars.next() {
                None => {
                    if !key.trim().is_empty() {
                        return Err(SqlAccessError::ConfigError(format!(
                            "connection string segment '{}' has no value",
                            key.trim()
                        )));
                    }
                    break;
                }
                Some(';') => {
                    if !key.trim().is_empty() {
                        return Err(SqlAccessError::ConfigError(format!(
                            "connection string segment '{}' has no value",
                            key.trim()
                        )));
                    }
                    continue;
                }
                Some(_) => {}
            }

            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            let mut value = String::new();
            match chars.peek().copied() {
                Some(quote @ ('\'' | '"')) => {
                    chars.next();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        if c == quote {
                            if chars.peek() == Some(&quote) {
                                value.push(quote);
                                chars.next();
                            } else {
                                closed = true;
                                break;
                            }
                        } else {
                            value.push(c);
                        }
                    }
                    if !closed {
                        return Err(SqlAccessError::ConfigError(format!(
                            "unterminated quote in value of '{}'",
                            key.trim()
                        )));
                    }
                    // skip to the separator
                    for c in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                    }
                }
                _ => {
                    for c in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                        value.push(c);
                    }
                    value = value.trim_end().to_string();
                }
            }
            pairs.push((normalize_key(&key), value));
        }

        Ok(Self { pairs })
    }

    /// Value for the first of `aliases` present; later duplicates of a key win.
    #[must_use]
    pub fn get(&self, aliases: &[&str]) -> Option<&str> {
        aliases.iter().find_map(|alias| {
            let alias = normalize_key(alias);
            self.pairs
                .iter()
                .rev()
                .find(|(k, _)| *k == alias)
                .map(|(_, v)| v.as_str())
        })
    }

    /// Parse a numeric value in seconds.
    ///
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` when the value is not a whole number.
    pub fn get_seconds(&self, aliases: &[&str]) -> Result<Option<Duration>, SqlAccessError> {
        self.get(aliases)
            .map(|raw| {
                raw.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    SqlAccessError::ConfigError(format!(
                        "'{}' must be a number of seconds, got '{raw}'",
                        aliases.first().copied().unwrap_or_default()
                    ))
                })
            })
            .transpose()
    }

    /// Parse a boolean flag (`true/false`, `yes/no`, `1/0`).
    ///
    /// # Errors
    /// Returns `SqlAccessError::ConfigError` for anything else.
    pub fn get_bool(&self, aliases: &[&str]) -> Result<Option<bool>, SqlAccessError> {
        self.get(aliases)
            .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(SqlAccessError::ConfigError(format!(
                    "'{}' must be true or false, got '{raw}'",
                    aliases.first().copied().unwrap_or_default()
                ))),
            })
            .transpose()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Whether the string is a URL (`scheme://...`) rather than key/value pairs.
#[must_use]
pub fn is_url(raw: &str, schemes: &[&str]) -> bool {
    let lowered = raw.trim_start().to_ascii_lowercase();
    schemes
        .iter()
        .any(|scheme| lowered.starts_with(&format!("{scheme}://")))
}

/// Split `host,port` / `host:port` as written in an ADO `Server=` value.
/// `tcp:` prefixes are dropped.
pub(crate) fn split_host_port(raw: &str) -> Result<(String, Option<u16>), SqlAccessError> {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("tcp:")
        .or_else(|| raw.strip_prefix("TCP:"))
        .unwrap_or(raw);
    let split = raw.rsplit_once(',').or_else(|| {
        // only treat ':' as a port separator when there is exactly one (not IPv6)
        if raw.matches(':').count() == 1 {
            raw.rsplit_once(':')
        } else {
            None
        }
    });
    match split {
        Some((host, port)) => {
            let port = port.trim().parse::<u16>().map_err(|_| {
                SqlAccessError::ConfigError(format!("invalid port '{port}' in '{raw}'"))
            })?;
            Ok((host.trim().to_string(), Some(port)))
        }
        None => Ok((raw.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_case_insensitively() {
        let cs = AdoConnectionString::parse(
            "Server=db1,1433; Database=Sales;User ID=app;Password='p;w''d';",
        )
        .unwrap();
        assert_eq!(cs.get(&["server"]), Some("db1,1433"));
        assert_eq!(cs.get(&["userid", "uid"]), Some("app"));
        assert_eq!(cs.get(&["PASSWORD"]), Some("p;w'd"));
        assert_eq!(cs.get(&["timeout"]), None);
    }

    #[test]
    fn rejects_segments_without_value() {
        assert!(matches!(
            AdoConnectionString::parse("Server=db;Oops"),
            Err(SqlAccessError::ConfigError(_))
        ));
        assert!(matches!(
            AdoConnectionString::parse("Password='open"),
            Err(SqlAccessError::ConfigError(_))
        ));
    }

    #[test]
    fn numeric_and_boolean_values() {
        let cs = AdoConnectionString::parse("Connect Timeout=30;Encrypt=yes;Pooling=maybe").unwrap();
        assert_eq!(
            cs.get_seconds(&["connect timeout", "timeout"]).unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(cs.get_bool(&["encrypt"]).unwrap(), Some(true));
        assert!(cs.get_bool(&["pooling"]).is_err());
    }

    #[test]
    fn host_and_port_forms() {
        assert_eq!(
            split_host_port("tcp:db.local,1444").unwrap(),
            ("db.local".to_string(), Some(1444))
        );
        assert_eq!(
            split_host_port("db.local:5433").unwrap(),
            ("db.local".to_string(), Some(5433))
        );
        assert_eq!(split_host_port("db.local").unwrap(), ("db.local".to_string(), None));
        assert!(split_host_port("db,abc").is_err());
    }

    #[test]
    fn url_detection() {
        assert!(is_url("postgres://u@h/db", &["postgres", "postgresql"]));
        assert!(!is_url("Host=h;Database=db", &["postgres", "postgresql"]));
    }
}
