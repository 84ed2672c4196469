//! Guards applied to generated SQL before it reaches the warehouse.
//!
//! Rollup queries are assembled from templates, so the only text that varies
//! per run is shard identifiers. Identifiers are checked against a strict
//! pattern, and the assembled statement is checked to be a single read-only
//! query.

use std::fmt;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "COPY", "ATTACH",
    "DETACH", "INSTALL", "LOAD", "PRAGMA", "EXPORT", "IMPORT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlGuardError {
    message: String,
}

impl SqlGuardError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SqlGuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SqlGuardError {}

/// Check that `name` is a bare SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<(), SqlGuardError> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(SqlGuardError::new("Identifier is empty")),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => {
            return Err(SqlGuardError::new(format!(
                "Identifier must start with a letter or underscore: {}",
                name
            )));
        }
        Some(_) => {}
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(SqlGuardError::new(format!(
            "Identifier contains invalid character {:?}: {}",
            bad, name
        )));
    }
    Ok(())
}

/// Validate that a SQL text is one read-only `SELECT`/`WITH` statement.
pub fn validate_read_only(sql: &str) -> Result<(), SqlGuardError> {
    let code = strip_comments_and_literals(sql);
    let tokens = keyword_tokens(&code);

    match tokens.first().map(String::as_str) {
        None => return Err(SqlGuardError::new("Query is empty")),
        Some("SELECT") | Some("WITH") => {}
        Some(_) => return Err(SqlGuardError::new("Query must start with SELECT or WITH")),
    }

    let body = code.trim_end();
    let body = body.strip_suffix(';').unwrap_or(body);
    if body.contains(';') {
        return Err(SqlGuardError::new("Multiple statements are not allowed"));
    }

    if let Some(token) = tokens
        .iter()
        .find(|t| FORBIDDEN_KEYWORDS.contains(&t.as_str()))
    {
        return Err(SqlGuardError::new(format!(
            "Query contains forbidden keyword: {}",
            token
        )));
    }

    Ok(())
}

fn keyword_tokens(code: &str) -> Vec<String> {
    code.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_uppercase())
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Code,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
}

/// Blank out comments and quoted text, keeping byte offsets stable.
fn strip_comments_and_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut state = Lexeme::Code;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        state = match (state, ch, next) {
            (Lexeme::Code, '-', Some('-')) => {
                chars.next();
                out.push_str("  ");
                Lexeme::LineComment
            }
            (Lexeme::Code, '/', Some('*')) => {
                chars.next();
                out.push_str("  ");
                Lexeme::BlockComment
            }
            (Lexeme::Code, '\'', _) => {
                out.push(' ');
                Lexeme::SingleQuoted
            }
            (Lexeme::Code, '"', _) => {
                out.push(' ');
                Lexeme::DoubleQuoted
            }
            (Lexeme::Code, c, _) => {
                out.push(c);
                Lexeme::Code
            }
            (Lexeme::LineComment, '\n', _) => {
                out.push('\n');
                Lexeme::Code
            }
            (Lexeme::BlockComment, '*', Some('/')) => {
                chars.next();
                out.push_str("  ");
                Lexeme::Code
            }
            // Doubled quote inside a literal is an escaped quote.
            (Lexeme::SingleQuoted, '\'', Some('\'')) => {
                chars.next();
                out.push_str("  ");
                Lexeme::SingleQuoted
            }
            (Lexeme::SingleQuoted, '\'', _) | (Lexeme::DoubleQuoted, '"', _) => {
                out.push(' ');
                Lexeme::Code
            }
            (inside, _, _) => {
                out.push(' ');
                inside
            }
        };
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert!(validate_identifier("main_summary_20240110").is_ok());
        assert!(validate_identifier("_scratch").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2024_main").is_err());
        assert!(validate_identifier("main summary").is_err());
        assert!(validate_identifier("main_summary_x; DROP TABLE y").is_err());
        assert!(validate_identifier("\"quoted\"").is_err());
    }

    #[test]
    fn test_validate_read_only_basic() {
        assert!(validate_read_only("SELECT * FROM events").is_ok());
        assert!(validate_read_only("WITH cte AS (SELECT 1) SELECT * FROM cte").is_ok());
        assert!(validate_read_only("  select 1").is_ok());
        assert!(validate_read_only("").is_err());
        assert!(validate_read_only("EXPLAIN SELECT * FROM events").is_err());
        assert!(validate_read_only("INSERT INTO events VALUES (1)").is_err());
        assert!(validate_read_only("DROP TABLE events").is_err());
        assert!(validate_read_only("COPY events TO 'x.csv'").is_err());
    }

    #[test]
    fn test_validate_read_only_comments_and_literals() {
        assert!(validate_read_only("SELECT 1 -- INSERT INTO events").is_ok());
        assert!(validate_read_only("SELECT 1 /* DROP */ FROM events").is_ok());
        assert!(validate_read_only("SELECT 'aborted-session' FROM events").is_ok());
        assert!(validate_read_only("SELECT 'it''s; DROP' FROM events").is_ok());
    }

    #[test]
    fn test_validate_read_only_multi_statement() {
        assert!(validate_read_only("SELECT 1; DROP TABLE events").is_err());
        assert!(validate_read_only("SELECT 1;\nSELECT 2").is_err());
        assert!(validate_read_only("SELECT 1; ").is_ok());
    }

    #[test]
    fn test_validate_read_only_nested_forbidden() {
        assert!(validate_read_only("SELECT * FROM (DELETE FROM events RETURNING *)").is_err());
    }
}
