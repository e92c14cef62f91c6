//! Built in rewrite rules.
use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dialect::Dialect;

pub type RuleFn = for<'a> fn(&'a str, Dialect) -> Cow<'a, str>;

/// A named, pure transformation of SQL text for a target dialect.
///
/// Full rules act on a statement as a whole and run before partial rules,
/// which rewrite fragments anywhere in the text.
#[derive(Clone, Copy)]
pub struct RewriteRule {
    pub name: &'static str,
    pub full: bool,
    pub apply: RuleFn,
}

impl std::fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteRule")
            .field("name", &self.name)
            .field("full", &self.full)
            .finish()
    }
}

/// Rules applied by [`crate::Rewriter::new`], in order.
pub fn builtin_rules() -> Vec<RewriteRule> {
    vec![
        RewriteRule {
            name: "show_databases",
            full: true,
            apply: show_databases,
        },
        RewriteRule {
            name: "show_tables",
            full: true,
            apply: show_tables,
        },
        RewriteRule {
            name: "backtick_quotes",
            full: false,
            apply: backtick_quotes,
        },
        RewriteRule {
            name: "cast_as_binary",
            full: false,
            apply: cast_as_binary,
        },
    ]
}

static SHOW_DATABASES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*SHOW\s+DATABASES\s*;?\s*$").unwrap());

static SHOW_TABLES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*SHOW\s+TABLES\s*;?\s*$").unwrap());

static CAST_AS_BINARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)CAST\s*\(\s*([^()]+?)\s+AS\s+BINARY\s*\)").unwrap());

pub fn show_databases(sql: &str, dialect: Dialect) -> Cow<'_, str> {
    if !SHOW_DATABASES.is_match(sql) {
        return Cow::Borrowed(sql);
    }
    let replacement = match dialect {
        Dialect::MySql => return Cow::Borrowed(sql),
        Dialect::Snowflake => {
            "SELECT database_name FROM information_schema.databases ORDER BY database_name"
        }
        Dialect::PostgreSql => {
            "SELECT datname AS database_name FROM pg_catalog.pg_database WHERE NOT datistemplate ORDER BY datname"
        }
        Dialect::Sqlite => "SELECT name AS database_name FROM pragma_database_list ORDER BY seq",
        Dialect::Oracle => "SELECT name AS database_name FROM v$database",
    };
    Cow::Borrowed(replacement)
}

pub fn show_tables(sql: &str, dialect: Dialect) -> Cow<'_, str> {
    if !SHOW_TABLES.is_match(sql) {
        return Cow::Borrowed(sql);
    }
    let replacement = match dialect {
        Dialect::MySql => return Cow::Borrowed(sql),
        Dialect::Snowflake => {
            "SELECT table_name FROM information_schema.tables WHERE table_schema = CURRENT_SCHEMA() ORDER BY table_name"
        }
        Dialect::PostgreSql => {
            "SELECT tablename AS table_name FROM pg_catalog.pg_tables WHERE schemaname = current_schema() ORDER BY tablename"
        }
        Dialect::Sqlite => {
            "SELECT name AS table_name FROM sqlite_master WHERE type = 'table' ORDER BY name"
        }
        Dialect::Oracle => "SELECT table_name FROM user_tables ORDER BY table_name",
    };
    Cow::Borrowed(replacement)
}

/// Swap backtick quoted identifiers for double quotes.
///
/// Backticks inside single quoted string literals are left alone.
pub fn backtick_quotes(sql: &str, dialect: Dialect) -> Cow<'_, str> {
    if dialect.accepts_backtick_quotes() || !sql.contains('`') {
        return Cow::Borrowed(sql);
    }

    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '`' if !in_literal => out.push('"'),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Drop `CAST(x AS BINARY)`, which MySQL uses to force case sensitive
/// comparisons.
pub fn cast_as_binary(sql: &str, dialect: Dialect) -> Cow<'_, str> {
    if dialect == Dialect::MySql {
        return Cow::Borrowed(sql);
    }
    CAST_AS_BINARY.replace_all(sql, "$1")
}
