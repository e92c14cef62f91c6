use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::dialect::Dialect;
use crate::rules::{RewriteRule, builtin_rules};

/// Applies an ordered set of rewrite rules.
#[derive(Debug, Clone)]
pub struct Rewriter {
    full: Vec<RewriteRule>,
    partial: Vec<RewriteRule>,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Rewriter {
    /// A rewriter with the built in rules.
    pub fn new() -> Self {
        Self::with_rules(builtin_rules())
    }

    /// Create a rewriter from rules. Relative order is kept within the full
    /// and partial groups.
    pub fn with_rules(rules: impl IntoIterator<Item = RewriteRule>) -> Self {
        let (full, partial) = rules.into_iter().partition(|r| r.full);
        Rewriter { full, partial }
    }

    /// Rewrite MySQL flavored SQL for the target dialect.
    pub fn rewrite(&self, sql: &str, dialect: Dialect) -> String {
        let mut current = sql.to_string();
        for rule in self.full.iter().chain(self.partial.iter()) {
            let rewritten = (rule.apply)(&current, dialect);
            if rewritten != current.as_str() {
                trace!(rule = rule.name, %dialect, "applied rewrite rule");
                current = rewritten.into_owned();
            }
        }
        current
    }
}

static ORACLE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*BEGIN\s+(.+?)\s*;\s*END\s*;\s*$").unwrap());

static TO_NUMBER_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*TO_NUMBER\s*\(\s*\?\s*\)\s*").unwrap());

static TO_CHAR_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*TO_CHAR\s*\(\s*\?\s*\)\s*").unwrap());

/// Rewrite an Oracle anonymous block calling a procedure into a plain `CALL`.
///
/// Conversions wrapped around placeholders are dropped. Anything else is
/// returned unchanged.
pub fn rewrite_call(sql: &str) -> String {
    let body = match ORACLE_CALL.captures(sql).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => return sql.to_string(),
    };
    let body = TO_NUMBER_ARG.replace_all(body, "?");
    let body = TO_CHAR_ARG.replace_all(&body, "?");
    format!("CALL {body}")
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn rewrite_for_dialect() {
        let rewriter = Rewriter::new();
        assert_eq!(
            "select \"Test\"",
            rewriter.rewrite("select `Test`", Dialect::Snowflake)
        );
        assert_eq!(
            "select `Test`",
            rewriter.rewrite("select `Test`", Dialect::Sqlite)
        );
        assert!(
            rewriter
                .rewrite("show databases", Dialect::Snowflake)
                .starts_with("SELECT database_name")
        );
    }

    #[test]
    fn multiline_cast_is_rewritten() {
        let sql = "select TABLE_NAME from information_schema.Tables where cast(TABLE_SCHEMA as binary) = ?  \n\
                   \t\tand (TABLE_TYPE = 'BASE TABLE' OR table_schema='information_schema')\n";
        let out = Rewriter::new().rewrite(sql, Dialect::PostgreSql);
        assert!(out.contains("where TABLE_SCHEMA = ?"));
        assert!(!out.to_lowercase().contains("binary"));
    }

    fn shout(sql: &str, _: Dialect) -> Cow<'_, str> {
        Cow::Owned(sql.to_uppercase())
    }

    fn suffix(sql: &str, _: Dialect) -> Cow<'_, str> {
        Cow::Owned(format!("{sql} -- x"))
    }

    #[test]
    fn full_rules_run_first() {
        let rewriter = Rewriter::with_rules([
            RewriteRule {
                name: "suffix",
                full: false,
                apply: suffix,
            },
            RewriteRule {
                name: "shout",
                full: true,
                apply: shout,
            },
        ]);
        assert_eq!("SELECT 1 -- x", rewriter.rewrite("select 1", Dialect::MySql));
    }

    #[test]
    fn call_blocks() {
        assert_eq!(
            "CALL p(?)",
            rewrite_call(" begin  p(  to_number  (  ?  )  )  ;  end ; ")
        );
        assert_eq!("CALL p(?)", rewrite_call("begin p(to_char(?));end;"));
        assert_eq!("select 1", rewrite_call("select 1"));
    }
}
