//! Validation utilities for key queries

use std::iter::Peekable;
use std::str::Chars;

use crate::config::Driver;
use crate::types::*;

const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT",
    "REVOKE", "CALL", "COPY", "LOCK",
];

/// A bare word of a query, upper-cased, with its parenthesis depth
#[derive(Debug, Clone, PartialEq, Eq)]
struct Word {
    text: String,
    depth: usize,
}

fn invalid(message: &str) -> ReconError {
    ReconError::Validation(message.to_string())
}

/// Consume up to the closing `quote`, treating a doubled quote as an escape
fn skip_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> bool {
    while let Some(c) = chars.next() {
        if c == quote {
            if chars.peek() == Some(&quote) {
                chars.next();
            } else {
                return true;
            }
        }
    }
    false
}

fn skip_block_comment(chars: &mut Peekable<Chars<'_>>) -> bool {
    let mut prev = None;
    for c in chars.by_ref() {
        if prev == Some('*') && c == '/' {
            return true;
        }
        prev = Some(c);
    }
    false
}

/// Split a query into the words the server would parse as SQL
///
/// String literals, quoted identifiers and comments contribute no words.
/// Trailing semicolons are allowed; anything after one is a second statement.
fn words(query: &str) -> ReconResult<Vec<Word>> {
    let mut words = Vec::new();
    let mut depth = 0usize;
    let mut ended = false;
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        let comment = matches!((c, chars.peek()), ('-', Some('-')) | ('/', Some('*')));
        if ended && !comment && c != ';' && !c.is_whitespace() {
            return Err(invalid("Query must be a single statement"));
        }

        match c {
            '\'' | '"' => {
                if !skip_quoted(&mut chars, c) {
                    return Err(invalid("Query has an unterminated quoted literal"));
                }
            }
            '-' if comment => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if comment => {
                chars.next();
                if !skip_block_comment(&mut chars) {
                    return Err(invalid("Query has an unterminated comment"));
                }
            }
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid("Query has unbalanced parentheses"))?
            }
            ';' => ended = true,
            c if c.is_alphanumeric() || c == '_' => {
                let mut text = c.to_string();
                while let Some(&next) = chars.peek() {
                    if !(next.is_alphanumeric() || next == '_') {
                        break;
                    }
                    text.push(next);
                    chars.next();
                }
                words.push(Word {
                    text: text.to_ascii_uppercase(),
                    depth,
                });
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(invalid("Query has unbalanced parentheses"));
    }
    Ok(words)
}

fn is_count(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Validate that a query is a single read-only statement
pub fn validate_read_only(query: &str) -> ReconResult<()> {
    if query.trim().trim_end_matches(';').trim().is_empty() {
        return Err(ReconError::Validation("Query cannot be empty".to_string()));
    }

    let words = words(query)?;
    match words.first().map(|w| w.text.as_str()) {
        Some("SELECT") | Some("WITH") => {}
        _ => {
            return Err(ReconError::Validation(
                "Query must start with SELECT or WITH".to_string(),
            ))
        }
    }

    if let Some(word) = words
        .iter()
        .find(|w| WRITE_KEYWORDS.contains(&w.text.as_str()))
    {
        return Err(ReconError::Validation(format!(
            "Query must be read-only, found '{}'",
            word.text
        )));
    }

    Ok(())
}

/// Validate that a query carries the driver's row-limiting clause
///
/// PostgreSQL accepts `LIMIT n` or `FETCH FIRST n ROWS ONLY`; Db2 accepts
/// `FETCH FIRST n ROWS ONLY`. Only a clause outside any parentheses bounds
/// the result; one in a subquery or a literal does not count.
pub fn validate_bounded(query: &str, driver: Driver) -> ReconResult<()> {
    let words = words(query)?;
    let outer = |w: &[Word]| w.iter().all(|word| word.depth == 0);

    let fetch_first = words.windows(5).any(|w| {
        outer(w)
            && w[0].text == "FETCH"
            && (w[1].text == "FIRST" || w[1].text == "NEXT")
            && is_count(&w[2].text)
            && (w[3].text == "ROWS" || w[3].text == "ROW")
            && w[4].text == "ONLY"
    });
    let limit = words
        .windows(2)
        .any(|w| outer(w) && w[0].text == "LIMIT" && is_count(&w[1].text));

    let bounded = match driver {
        Driver::Postgres => limit || fetch_first,
        Driver::Db2 => fetch_first,
    };

    if bounded {
        Ok(())
    } else {
        Err(ReconError::Validation(format!(
            "Query for {} must be bounded with {}",
            driver.as_str(),
            driver.row_limit_hint()
        )))
    }
}

/// Validate that a key column name is a plain identifier
pub fn validate_key_column(column: &str) -> ReconResult<()> {
    if column.trim().is_empty() {
        return Err(ReconError::Validation(
            "Key column cannot be empty".to_string(),
        ));
    }

    if column.len() > 128 {
        return Err(ReconError::Validation(
            "Key column cannot exceed 128 characters".to_string(),
        ));
    }

    if !column.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ReconError::Validation(
            "Key column can only contain alphanumeric characters and underscores".to_string(),
        ));
    }

    Ok(())
}

/// Run every check a key query has to pass before a connection is opened
pub fn validate_key_query(query: &str, column: &str, driver: Driver) -> ReconResult<()> {
    validate_read_only(query)?;
    validate_bounded(query, driver)?;
    validate_key_column(column)
}

/// Append the driver's row-limiting clause to an unbounded query
pub fn bounded(query: &str, driver: Driver, rows: u64) -> String {
    let statement = query.trim().trim_end_matches(';').trim_end();
    format!("{} {}", statement, driver.row_limit_clause(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_accepts_select_and_cte() {
        assert!(validate_read_only("SELECT account_no FROM accounts LIMIT 10;").is_ok());
        assert!(validate_read_only(
            "with a as (select account_no from accounts) select account_no from a"
        )
        .is_ok());
    }

    #[test]
    fn test_read_only_rejects_writes_and_batches() {
        assert!(validate_read_only("").is_err());
        assert!(validate_read_only("DELETE FROM accounts").is_err());
        assert!(validate_read_only("SELECT 1; DROP TABLE accounts").is_err());
        assert!(
            validate_read_only("WITH gone AS (DELETE FROM accounts RETURNING account_no) SELECT * FROM gone")
                .is_err()
        );
    }

    #[test]
    fn test_bounds_follow_dialect() {
        let pg = "SELECT account_no FROM accounts LIMIT 10";
        let db2 = "SELECT account_no FROM accounts FETCH FIRST 10 ROWS ONLY";

        assert!(validate_bounded(pg, Driver::Postgres).is_ok());
        assert!(validate_bounded(db2, Driver::Postgres).is_ok());
        assert!(validate_bounded(db2, Driver::Db2).is_ok());
        assert!(validate_bounded(pg, Driver::Db2).is_err());
        assert!(validate_bounded("SELECT account_no FROM accounts", Driver::Postgres).is_err());
        assert!(validate_bounded("SELECT account_no FROM accounts LIMIT ALL", Driver::Postgres).is_err());
    }

    #[test]
    fn test_keywords_inside_literals_are_data() {
        assert!(validate_read_only(
            "SELECT account_no FROM accounts WHERE status <> 'DELETED' AND note <> 'delete' LIMIT 10"
        )
        .is_ok());
        assert!(validate_read_only(
            "SELECT \"update\" AS account_no FROM accounts WHERE memo = 'it''s a lock; drop it' LIMIT 10"
        )
        .is_ok());
        assert!(validate_read_only(
            "SELECT account_no FROM accounts -- delete later\n/* truncate; */ LIMIT 10"
        )
        .is_ok());
        assert!(validate_read_only("SELECT account_no FROM accounts WHERE note = 'delete").is_err());
    }

    #[test]
    fn test_semicolon_only_allowed_at_the_end() {
        assert!(validate_read_only("SELECT account_no FROM accounts LIMIT 10;;").is_ok());
        assert!(validate_read_only("SELECT account_no FROM accounts LIMIT 10; -- done").is_ok());
        assert!(validate_read_only("SELECT account_no FROM accounts LIMIT 10; SELECT 1").is_err());
    }

    #[test]
    fn test_subquery_limit_does_not_bound_outer_query() {
        let query = "SELECT account_no FROM accounts WHERE branch IN (SELECT id FROM branches LIMIT 5)";
        assert!(validate_bounded(query, Driver::Postgres).is_err());

        let query = "SELECT account_no FROM accounts WHERE branch IN \
                     (SELECT id FROM branches FETCH FIRST 5 ROWS ONLY)";
        assert!(validate_bounded(query, Driver::Db2).is_err());

        let query = "SELECT account_no FROM accounts WHERE branch IN (SELECT id FROM branches LIMIT 5) LIMIT 100";
        assert!(validate_bounded(query, Driver::Postgres).is_ok());
    }

    #[test]
    fn test_limit_inside_literal_does_not_bound() {
        assert!(
            validate_bounded("SELECT account_no FROM accounts WHERE memo = 'LIMIT 10'", Driver::Postgres)
                .is_err()
        );
        assert!(validate_bounded(
            "SELECT account_no FROM accounts /* FETCH FIRST 10 ROWS ONLY */",
            Driver::Db2
        )
        .is_err());
        assert!(validate_bounded("SELECT (account_no FROM accounts LIMIT 10", Driver::Postgres).is_err());
    }

    #[test]
    fn test_key_column_shape() {
        assert!(validate_key_column("account_no").is_ok());
        assert!(validate_key_column(" ").is_err());
        assert!(validate_key_column("account_no; --").is_err());
    }

    #[test]
    fn test_bounded_appends_clause() {
        let query = bounded("SELECT account_no FROM accounts;", Driver::Db2, 500);
        assert_eq!(
            query,
            "SELECT account_no FROM accounts FETCH FIRST 500 ROWS ONLY"
        );
        assert!(validate_key_query(&query, "account_no", Driver::Db2).is_ok());

        let query = bounded("SELECT account_no FROM accounts", Driver::Postgres, 500);
        assert_eq!(query, "SELECT account_no FROM accounts LIMIT 500");
    }
}
