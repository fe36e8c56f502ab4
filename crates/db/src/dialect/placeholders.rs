//! Positional placeholder rewriting
//!
//! Callers always write `?` for parameters. The networked dialect needs
//! `$1..$n` instead. The rewrite runs over real SQL tokens, so a `?` inside a
//! string literal, a quoted identifier, a comment or a dollar-quoted body is
//! never touched. Numbered `?N` placeholders are left alone.

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::backends::SqlDialect;
use crate::error::{DbError, DbResult};

/// Byte offsets of every bare `?` placeholder in `sql`, left to right
pub fn positional_placeholders(sql: &str) -> DbResult<Vec<usize>> {
    if !sql.contains('?') {
        return Ok(Vec::new());
    }

    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| DbError::Query(format!("Failed to tokenize SQL: {}", e)))?;

    let line_starts = line_start_offsets(sql);
    let mut offsets = Vec::new();

    for token in tokens {
        if !matches!(&token.token, Token::Placeholder(p) if p == "?") {
            continue;
        }

        let offset = byte_offset(sql, &line_starts, token.location.line, token.location.column)
            .filter(|&offset| sql[offset..].starts_with('?'))
            .ok_or_else(|| {
                DbError::Query(format!(
                    "Placeholder location {}:{} does not map into the statement",
                    token.location.line, token.location.column
                ))
            })?;
        offsets.push(offset);
    }

    Ok(offsets)
}

/// Rewrite `?` placeholders into `dialect`'s native form.
///
/// Fails when the number of placeholders differs from `param_count`.
pub fn rewrite_placeholders(sql: &str, dialect: SqlDialect, param_count: usize) -> DbResult<String> {
    let offsets = positional_placeholders(sql)?;

    if offsets.len() != param_count {
        return Err(DbError::Query(format!(
            "Statement has {} placeholder(s) but {} parameter(s) were supplied",
            offsets.len(),
            param_count
        )));
    }

    if dialect == SqlDialect::SQLite || offsets.is_empty() {
        return Ok(sql.to_string());
    }

    let mut rewritten = String::with_capacity(sql.len() + offsets.len() * 2);
    let mut last = 0;
    for (index, offset) in offsets.into_iter().enumerate() {
        rewritten.push_str(&sql[last..offset]);
        rewritten.push_str(&dialect.parameter_placeholder(index));
        last = offset + 1;
    }
    rewritten.push_str(&sql[last..]);

    Ok(rewritten)
}

fn line_start_offsets(sql: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

// Tokenizer locations are 1-based lines and 1-based character columns.
fn byte_offset(sql: &str, line_starts: &[usize], line: u64, column: u64) -> Option<usize> {
    let line_start = *line_starts.get(usize::try_from(line).ok()?.checked_sub(1)?)?;
    let column = usize::try_from(column).ok()?.checked_sub(1)?;
    sql[line_start..]
        .char_indices()
        .nth(column)
        .map(|(i, _)| line_start + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_networked_numbering_is_left_to_right() {
        let sql = rewrite_placeholders("WHERE id = ? AND x = ?", SqlDialect::PostgreSQL, 2).unwrap();
        assert_eq!(sql, "WHERE id = $1 AND x = $2");
    }

    #[test]
    fn test_embedded_keeps_question_marks() {
        let sql = rewrite_placeholders("WHERE id = ? AND x = ?", SqlDialect::SQLite, 2).unwrap();
        assert_eq!(sql, "WHERE id = ? AND x = ?");
    }

    #[test]
    fn test_literal_question_marks_untouched() {
        let sql = rewrite_placeholders(
            "SELECT 'who?' AS q, \"odd?col\" FROM t WHERE a = ? -- really?\n AND b = ?",
            SqlDialect::PostgreSQL,
            2,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT 'who?' AS q, \"odd?col\" FROM t WHERE a = $1 -- really?\n AND b = $2"
        );
    }

    #[test]
    fn test_block_comment_and_multiline() {
        let sql = rewrite_placeholders(
            "/* is this ? */\nINSERT INTO t (a, b)\nVALUES (?,\n  ?)",
            SqlDialect::PostgreSQL,
            2,
        )
        .unwrap();
        assert_eq!(sql, "/* is this ? */\nINSERT INTO t (a, b)\nVALUES ($1,\n  $2)");
    }

    #[test]
    fn test_multibyte_text_before_placeholder() {
        let sql = rewrite_placeholders("SELECT 'héllo wörld' = ?", SqlDialect::PostgreSQL, 1).unwrap();
        assert_eq!(sql, "SELECT 'héllo wörld' = $1");
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let err = rewrite_placeholders("SELECT ?", SqlDialect::PostgreSQL, 2).unwrap_err();
        assert!(matches!(err, DbError::Query(_)));

        let err = rewrite_placeholders("SELECT 1", SqlDialect::SQLite, 1).unwrap_err();
        assert!(matches!(err, DbError::Query(_)));
    }

    #[test]
    fn test_no_placeholders_fast_path() {
        assert!(positional_placeholders("CREATE TABLE t (id INTEGER)").unwrap().is_empty());
        assert_eq!(
            rewrite_placeholders("SELECT 'no params'", SqlDialect::PostgreSQL, 0).unwrap(),
            "SELECT 'no params'"
        );
    }

    #[test]
    fn test_unterminated_literal_is_an_error() {
        assert!(positional_placeholders("SELECT 'oops ?").is_err());
    }
}
