//! Named-placeholder rewriting for backends without native named parameters.
//!
//! Command text is written with `@name` (or `:name`) placeholders regardless of the
//! backend. `PostgreSQL` wants `$1`, `$2`, ... and `MySQL` wants bare `?`, so the text
//! is rewritten before it reaches the driver, together with the order in which the
//! parameters must be bound.

use std::borrow::Cow;

mod parsers;
mod scanner;

use parsers::{
    is_block_comment_end, is_block_comment_start, is_line_comment_start, matches_tag,
    try_start_dollar_quote,
};
use scanner::{State, is_identifier_byte, scan_identifier};

/// Target placeholder style for rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL-style numbered placeholders like `$1`; repeated names reuse their number.
    Numbered,
    /// MySQL-style positional `?`; repeated names are bound again.
    Positional,
}

/// Output of [`rewrite_named_placeholders`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenSql<'a> {
    pub sql: Cow<'a, str>,
    /// Indexes into the parameter list, in the order values must be bound.
    pub bind_order: Vec<usize>,
}

/// Rewrite `@name` / `:name` placeholders that match one of `names`.
///
/// Names are matched case-insensitively. Placeholders that match no parameter are left
/// untouched, so session variables (`@counter`), `@@system` variables and `::type`
/// casts survive. Quoted strings, quoted identifiers and comments are skipped via a
/// small state machine; dollar-quoted bodies are skipped for the numbered style and
/// backtick identifiers, backslash escapes and `#` comments for the positional style.
///
/// Returns a borrowed `Cow` when no changes are needed.
#[must_use]
pub fn rewrite_named_placeholders<'a>(
    sql: &'a str,
    style: PlaceholderStyle,
    names: &[&str],
) -> RewrittenSql<'a> {
    let mysql_lexing = matches!(style, PlaceholderStyle::Positional);
    let mut out: Option<Vec<u8>> = None;
    let mut bind_order: Vec<usize> = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0;
    let bytes = sql.as_bytes();

    while idx < bytes.len() {
        let b = bytes[idx];
        let mut consumed_to = idx;
        let mut replacement: Option<String> = None;
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'`' if mysql_lexing => state = State::BacktickQuoted,
                _ if is_line_comment_start(bytes, idx, mysql_lexing) => {
                    state = State::LineComment;
                }
                _ if is_block_comment_start(bytes, idx) => state = State::BlockComment(1),
                b'$' if !mysql_lexing => {
                    if let Some((tag, close)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        consumed_to = close;
                    }
                }
                b'@' if bytes.get(idx + 1) == Some(&b'@') => {
                    // @@system_variable
                    consumed_to = idx + 1;
                }
                b':' if bytes.get(idx + 1) == Some(&b':') => {
                    // ::cast
                    consumed_to = idx + 1;
                }
                b'@' | b':' if idx == 0 || !is_identifier_byte(bytes[idx - 1]) => {
                    if let Some((end, ident)) = scan_identifier(bytes, idx + 1)
                        && let Some(position) =
                            names.iter().position(|n| n.eq_ignore_ascii_case(ident))
                    {
                        replacement = Some(placeholder(style, position, &mut bind_order));
                        consumed_to = end - 1;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\\' && mysql_lexing {
                    consumed_to = idx + 1;
                } else if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        consumed_to = idx + 1; // escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        consumed_to = idx + 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::BacktickQuoted => {
                if b == b'`' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) && !mysql_lexing {
                    state = State::BlockComment(depth + 1);
                    consumed_to = idx + 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    consumed_to = idx + 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    consumed_to = idx + 1 + tag.len();
                    state = State::Normal;
                }
            }
        }

        let consumed_to = consumed_to.min(bytes.len() - 1);
        match replacement {
            Some(text) => {
                let buf = out.get_or_insert_with(|| bytes[..idx].to_vec());
                buf.extend_from_slice(text.as_bytes());
            }
            None => {
                if let Some(buf) = out.as_mut() {
                    buf.extend_from_slice(&bytes[idx..=consumed_to]);
                }
            }
        }
        idx = consumed_to + 1;
    }

    let sql = match out {
        Some(buf) => Cow::Owned(
            String::from_utf8(buf)
                .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned()),
        ),
        None => Cow::Borrowed(sql),
    };
    RewrittenSql { sql, bind_order }
}

fn placeholder(style: PlaceholderStyle, position: usize, bind_order: &mut Vec<usize>) -> String {
    match style {
        PlaceholderStyle::Numbered => {
            let number = match bind_order.iter().position(|p| *p == position) {
                Some(existing) => existing + 1,
                None => {
                    bind_order.push(position);
                    bind_order.len()
                }
            };
            format!("${number}")
        }
        PlaceholderStyle::Positional => {
            bind_order.push(position);
            "?".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_named_parameters_by_first_use() {
        let res = rewrite_named_placeholders(
            "select * from t where b = @b and a = :a or b2 = @B",
            PlaceholderStyle::Numbered,
            &["a", "b"],
        );
        assert_eq!(res.sql, "select * from t where b = $1 and a = $2 or b2 = $1");
        assert_eq!(res.bind_order, vec![1, 0]);
    }

    #[test]
    fn positional_repeats_bindings() {
        let res = rewrite_named_placeholders(
            "update t set x = @x where id = @id or parent = @id",
            PlaceholderStyle::Positional,
            &["id", "x"],
        );
        assert_eq!(res.sql, "update t set x = ? where id = ? or parent = ?");
        assert_eq!(res.bind_order, vec![1, 0, 0]);
    }

    #[test]
    fn leaves_casts_system_variables_and_unknown_names() {
        let sql = "select @id::int, @@identity, @other, x:=1";
        let res = rewrite_named_placeholders(sql, PlaceholderStyle::Numbered, &["id", "identity"]);
        assert_eq!(res.sql, "select $1::int, @@identity, @other, x:=1");
        assert_eq!(res.bind_order, vec![0]);
    }

    #[test]
    fn skips_inside_literals_and_comments() {
        let sql = "select '@id', \"@id\" -- @id\n/* :id */ from t where a = @id";
        let res = rewrite_named_placeholders(sql, PlaceholderStyle::Numbered, &["id"]);
        assert_eq!(
            res.sql,
            "select '@id', \"@id\" -- @id\n/* :id */ from t where a = $1"
        );
    }

    #[test]
    fn skips_dollar_quoted_blocks() {
        let sql = "$fn$ select @id $fn$ where a = @id";
        let res = rewrite_named_placeholders(sql, PlaceholderStyle::Numbered, &["id"]);
        assert_eq!(res.sql, "$fn$ select @id $fn$ where a = $1");
    }

    #[test]
    fn mysql_lexing_handles_backticks_and_escapes() {
        let sql = "select `@id`, 'it\\'s @id' # @id\nfrom t where a = @id";
        let res = rewrite_named_placeholders(sql, PlaceholderStyle::Positional, &["id"]);
        assert_eq!(res.sql, "select `@id`, 'it\\'s @id' # @id\nfrom t where a = ?");
        assert_eq!(res.bind_order, vec![0]);
    }

    #[test]
    fn unchanged_sql_is_borrowed() {
        let sql = "select 1 -- café";
        let res = rewrite_named_placeholders(sql, PlaceholderStyle::Numbered, &["id"]);
        assert!(matches!(res.sql, Cow::Borrowed(_)));
        assert!(res.bind_order.is_empty());
    }

    #[test]
    fn keeps_multibyte_text_intact() {
        let sql = "select 'naïve', @id";
        let res = rewrite_named_placeholders(sql, PlaceholderStyle::Numbered, &["id"]);
        assert_eq!(res.sql, "select 'naïve', $1");
    }

    #[test]
    fn email_like_text_is_not_a_placeholder() {
        let sql = "select a@id from t";
        let res = rewrite_named_placeholders(sql, PlaceholderStyle::Numbered, &["id"]);
        assert_eq!(res.sql, sql);
    }
}
