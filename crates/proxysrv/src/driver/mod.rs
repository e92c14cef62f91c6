//! Interface to the real database.
//!
//! The proxy only ever talks to a database through these traits. A driver is
//! picked by url when a client opens a connection.
pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use proxyproto::value::Value;
use tracing::debug;

/// A failure raised by a driver, carrying the vendor's state and code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
    pub sql_state: Option<String>,
    pub error_code: i32,
    pub cause: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        DriverError {
            message: message.into(),
            sql_state: None,
            error_code: 0,
            cause: None,
        }
    }

    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = code;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Cursor capabilities requested when preparing a statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareOptions {
    pub scrollable: bool,
    pub updatable: bool,
}

impl PrepareOptions {
    /// Options used for statements that produce rows.
    pub const fn scrollable_updatable() -> Self {
        PrepareOptions {
            scrollable: true,
            updatable: true,
        }
    }
}

/// Name and declared type of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub decl_type: Option<String>,
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Check if this driver can open the given url.
    fn accepts(&self, url: &str) -> bool;

    async fn connect(
        &self,
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> DriverResult<Box<dyn DriverConnection>>;
}

#[async_trait]
pub trait DriverConnection: Send + Sync {
    async fn prepare(&self, sql: &str, opts: PrepareOptions)
    -> DriverResult<Box<dyn DriverStatement>>;

    fn is_closed(&self) -> bool;

    async fn close(&mut self) -> DriverResult<()>;
}

#[async_trait]
pub trait DriverStatement: Send + Sync {
    /// Number of placeholders in the prepared SQL.
    fn parameter_count(&self) -> usize;

    /// Bind a value to a 1-based position.
    fn bind(&mut self, position: u32, value: Value) -> DriverResult<()>;

    async fn execute_query(&mut self) -> DriverResult<Box<dyn DriverCursor>>;

    async fn execute_update(&mut self) -> DriverResult<u64>;

    fn is_closed(&self) -> bool;

    async fn close(&mut self) -> DriverResult<()>;
}

#[async_trait]
pub trait DriverCursor: Send + Sync {
    fn columns(&self) -> &[ColumnMeta];

    /// Advance to the next row, returning `None` once the cursor is past the
    /// last row.
    async fn next(&mut self) -> DriverResult<Option<Vec<Value>>>;

    fn is_closed(&self) -> bool;

    async fn close(&mut self) -> DriverResult<()>;
}

/// Set of drivers available to the server.
#[derive(Clone, Default)]
pub struct DriverManager {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager with every driver built into this crate.
    pub fn with_builtin_drivers() -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(sqlite::SqliteDriver));
        manager
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.push(driver);
    }

    /// Connect using the first driver that accepts the url.
    pub async fn connect(
        &self,
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> DriverResult<Box<dyn DriverConnection>> {
        let driver = self
            .drivers
            .iter()
            .find(|d| d.accepts(url))
            .ok_or_else(|| {
                DriverError::new(format!("No suitable driver found for {url}"))
                    .with_sql_state("08001")
            })?;
        debug!(driver = driver.name(), %url, "connecting with driver");
        driver.connect(url, user, password).await
    }
}

impl fmt::Debug for DriverManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.drivers.iter().map(|d| d.name()))
            .finish()
    }
}
