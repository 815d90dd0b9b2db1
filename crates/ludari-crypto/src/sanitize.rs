//! Query sanitizer for decrypted job queries.
//!
//! The goal is not a SQL parser; it is to catch the classic injection
//! shapes before a stored query reaches the storage back end.
//!
//! Decision order:
//!   1. Strip `--` line comments and `/* */` block comments, collapse
//!      whitespace.
//!   2. Reject when the remaining statement is empty or over-long.
//!   3. The leading keyword must be on the allow-list.
//!   4. Reject on any deny pattern (chained DDL, UNION SELECT, trailing
//!      comment, system-catalog references).

use crate::{CryptoError, Result};

/// Maximum sanitized query length in characters.
const MAX_QUERY_LEN: usize = 10_000;

/// Statements a stored query may begin with.
const ALLOWED_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "with", "call", "exec", "execute",
];

/// `(substring_pattern, reason)` pairs checked against the lowercased,
/// whitespace-collapsed statement. The first match wins.
const DENYLIST: &[(&str, &str)] = &[
    // A second statement chained behind a `;` that starts DDL or wipes data.
    ("; drop", "chained DROP statement"),
    ("; alter", "chained ALTER statement"),
    ("; create", "chained CREATE statement"),
    ("; truncate", "chained TRUNCATE statement"),
    ("; grant", "chained GRANT statement"),
    // Vendor system catalogs: schema discovery, not job work.
    ("information_schema", "system catalog reference"),
    ("pg_", "postgres system catalog reference"),
    ("mysql.", "mysql system schema reference"),
    // Microsoft extended procedures.
    ("xp_", "extended procedure reference"),
    ("sp_", "system procedure reference"),
];

/// Sanitize a query: returns the collapsed statement or the reason it was
/// rejected.
pub fn sanitize_query(query: &str) -> Result<String> {
    // A trailing line comment on the raw input is an injection tell even
    // though stripping would erase it.
    if query.trim_end().ends_with("--") {
        return Err(CryptoError::QueryRejected(
            "trailing comment marker".into(),
        ));
    }

    let stripped = strip_comments(query);
    let collapsed = collapse_whitespace(&stripped);
    if collapsed.is_empty() {
        return Err(CryptoError::QueryRejected("empty statement".into()));
    }
    if collapsed.chars().count() > MAX_QUERY_LEN {
        return Err(CryptoError::QueryRejected(format!(
            "statement exceeds {MAX_QUERY_LEN} characters"
        )));
    }

    let lower = collapsed.to_lowercase();
    let leading = lower.split_whitespace().next().unwrap_or("");
    if !ALLOWED_KEYWORDS.contains(&leading) {
        return Err(CryptoError::QueryRejected(format!(
            "statement must begin with one of SELECT, INSERT, UPDATE, DELETE, WITH, CALL, EXEC, EXECUTE (got '{leading}')"
        )));
    }

    if let Some((pattern, reason)) = DENYLIST.iter().find(|(p, _)| lower.contains(p)) {
        return Err(CryptoError::QueryRejected(format!(
            "{reason} (matched pattern: `{pattern}`)"
        )));
    }

    // UNION … SELECT with anything in between.
    if let Some(pos) = lower.find("union") {
        if lower[pos..].contains("select") {
            return Err(CryptoError::QueryRejected("UNION SELECT chain".into()));
        }
    }

    Ok(collapsed)
}

/// Remove `-- …` line comments and non-nested `/* … */` block comments.
fn strip_comments(query: &str) -> String {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '-' && chars.get(i + 1) == Some(&'-') {
            // skip to end of line
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- accepted statements ---

    #[test]
    fn plain_select_passes_unchanged() {
        assert_eq!(sanitize_query("SELECT 1").unwrap(), "SELECT 1");
    }

    #[test]
    fn whitespace_and_comments_are_collapsed() {
        let q = "SELECT a,\n       b  /* cols */\nFROM t -- trailing note\nWHERE a > 1";
        assert_eq!(
            sanitize_query(q).unwrap(),
            "SELECT a, b FROM t WHERE a > 1"
        );
    }

    #[test]
    fn every_allowed_keyword_passes() {
        for q in [
            "SELECT 1",
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET a = 1",
            "DELETE FROM t WHERE a = 1",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "CALL refresh_totals()",
            "EXEC refresh_totals",
            "EXECUTE refresh_totals",
        ] {
            assert!(sanitize_query(q).is_ok(), "rejected: {q}");
        }
    }

    // --- rejected statements ---

    #[test]
    fn rejects_non_allowlisted_leading_keyword() {
        assert!(sanitize_query("DROP TABLE jobs").is_err());
        assert!(sanitize_query("TRUNCATE jobs").is_err());
    }

    #[test]
    fn rejects_chained_ddl() {
        let err = sanitize_query("SELECT 1; DROP TABLE jobs").unwrap_err();
        assert!(err.to_string().contains("DROP"));
        assert!(sanitize_query("SELECT 1; CREATE TABLE x (a int)").is_err());
    }

    #[test]
    fn rejects_union_select() {
        assert!(sanitize_query("SELECT a FROM t UNION SELECT password FROM users").is_err());
        assert!(sanitize_query("SELECT a FROM t UNION ALL SELECT b FROM u").is_err());
    }

    #[test]
    fn rejects_trailing_comment_marker() {
        assert!(sanitize_query("SELECT a FROM users WHERE name = 'x' --").is_err());
    }

    #[test]
    fn rejects_system_catalogs() {
        assert!(sanitize_query("SELECT * FROM information_schema.tables").is_err());
        assert!(sanitize_query("SELECT * FROM pg_catalog.pg_tables").is_err());
        assert!(sanitize_query("SELECT * FROM mysql.user").is_err());
        assert!(sanitize_query("EXEC xp_cmdshell 'dir'").is_err());
        assert!(sanitize_query("EXEC sp_configure").is_err());
    }

    #[test]
    fn rejects_empty_and_overlong() {
        assert!(sanitize_query("").is_err());
        assert!(sanitize_query("   /* nothing */  ").is_err());
        let long = format!("SELECT {}", "x,".repeat(6000));
        assert!(sanitize_query(&long).is_err());
    }

    #[test]
    fn case_is_ignored_for_checks_but_preserved_in_output() {
        let out = sanitize_query("select A from T").unwrap();
        assert_eq!(out, "select A from T");
        assert!(sanitize_query("SeLeCt 1; dRoP tAbLe x").is_err());
    }
}
