use std::fmt;
use std::str::FromStr;

use crate::errors::RewriteError;

/// Database family a statement is rewritten for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    PostgreSql,
    Snowflake,
    Sqlite,
    Oracle,
}

impl Dialect {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "MySQL",
            Dialect::PostgreSql => "PostgreSQL",
            Dialect::Snowflake => "Snowflake",
            Dialect::Sqlite => "SQLite",
            Dialect::Oracle => "Oracle",
        }
    }

    /// Whether identifiers may be quoted with backticks.
    pub const fn accepts_backtick_quotes(&self) -> bool {
        matches!(self, Dialect::MySql | Dialect::Sqlite)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = RewriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Dialect::MySql,
            "postgres" | "postgresql" | "pg" => Dialect::PostgreSql,
            "snowflake" => Dialect::Snowflake,
            "sqlite" | "sqlite3" => Dialect::Sqlite,
            "oracle" => Dialect::Oracle,
            _ => return Err(RewriteError::UnknownDialect(s.to_string())),
        })
    }
}
