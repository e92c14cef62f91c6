use std::collections::BTreeMap;
use std::sync::Arc;

use proxyproto::ids::StatementId;
use proxyproto::messages::Request;
use proxyproto::value::Value;
use tracing::debug;

use crate::connection::ConnShared;
use crate::cursor::ProxyCursor;
use crate::errors::{ClientError, Result};

/// Leading keywords of statements that produce rows.
const ROW_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "VALUES", "PRAGMA", "EXPLAIN"];

/// Outcome of [`ProxyStatement::execute`].
#[derive(Debug)]
pub enum ExecuteResult {
    Rows(ProxyCursor),
    Updated(i64),
}

/// A statement with locally accumulated parameters.
pub struct ProxyStatement {
    conn: Arc<ConnShared>,
    sql: String,
    params: BTreeMap<u32, Value>,
    fetch_size: i32,
    /// Server statement backing the most recent query.
    server_statement: Option<StatementId>,
    closed: bool,
}

impl ProxyStatement {
    pub(crate) fn new(conn: Arc<ConnShared>, sql: String) -> Self {
        ProxyStatement {
            conn,
            sql,
            params: BTreeMap::new(),
            fetch_size: 0,
            server_statement: None,
            closed: false,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Rows per batch requested from the server. Zero or less uses the
    /// server's default.
    pub fn set_fetch_size(&mut self, rows: i32) {
        self.fetch_size = rows;
    }

    /// Bind a value to a 1-based position.
    pub fn set(&mut self, position: u32, value: impl Into<Value>) -> Result<()> {
        if position == 0 {
            return Err(ClientError::InvalidParameter(position));
        }
        self.params.insert(position, value.into());
        Ok(())
    }

    pub fn set_null(&mut self, position: u32) -> Result<()> {
        self.set(position, Value::Null)
    }

    pub fn clear_parameters(&mut self) {
        self.params.clear();
    }

    pub async fn execute_query(&mut self) -> Result<ProxyCursor> {
        self.ensure_open()?;
        // Re-executing replaces the previous server statement.
        self.release_server_statement().await?;

        let req = Request::execute_query(
            self.conn.id.clone(),
            self.sql.clone(),
            self.params.clone(),
            self.fetch_size,
        );
        let resp = self.conn.transport.request(req).await?;
        self.server_statement = resp.statement_id.clone();
        Ok(ProxyCursor::new(self.conn.clone(), resp, self.fetch_size))
    }

    /// Run the statement, returning the number of affected rows.
    pub async fn execute_update(&mut self) -> Result<i64> {
        self.ensure_open()?;
        let req = Request::execute_update(
            self.conn.id.clone(),
            self.sql.clone(),
            self.params.clone(),
        );
        let resp = self.conn.transport.request(req).await?;
        Ok(resp.update_count)
    }

    /// Run the statement as a query or an update depending on its leading
    /// keyword.
    pub async fn execute(&mut self) -> Result<ExecuteResult> {
        if returns_rows(&self.sql) {
            Ok(ExecuteResult::Rows(self.execute_query().await?))
        } else {
            Ok(ExecuteResult::Updated(self.execute_update().await?))
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.conn.is_closed()
    }

    /// Close the statement and any cursor it produced.
    ///
    /// Nothing is sent if the owning connection is already closed.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.conn.is_closed() {
            return Ok(());
        }
        self.release_server_statement().await
    }

    async fn release_server_statement(&mut self) -> Result<()> {
        if let Some(stmt_id) = self.server_statement.take() {
            debug!(statement_id = %stmt_id, "closing server statement");
            self.conn
                .transport
                .request(Request::close_statement(self.conn.id.clone(), stmt_id))
                .await?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        self.conn.ensure_open()?;
        if self.closed {
            return Err(ClientError::StatementClosed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProxyStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyStatement")
            .field("conn_id", &self.conn.id)
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .field("closed", &self.closed)
            .finish()
    }
}

fn returns_rows(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    ROW_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(&keyword))
}
