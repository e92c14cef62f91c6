//! Server side bookkeeping for open connections, statements, and result sets.
//!
//! Every handle lives in a concurrent map keyed by its opaque id. Statement
//! and result set ids are prefixed by their owner's id, so closing an owner
//! is a prefix scan over the child maps.
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use proxyproto::ids::{ConnectionId, ResultSetId, StatementId, is_prefixed_by};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cursor::DecryptingCursor;
use crate::driver::{DriverConnection, DriverStatement};
use crate::errors::{ProxySrvError, Result};

pub type SharedConnection = Arc<Mutex<Box<dyn DriverConnection>>>;
pub type SharedStatement = Arc<Mutex<Box<dyn DriverStatement>>>;
pub type SharedCursor = Arc<Mutex<DecryptingCursor>>;

struct ConnectionHandle {
    conn: SharedConnection,
    last_activity: Instant,
}

/// Counts of entries removed by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub connections: usize,
    pub statements: usize,
    pub result_sets: usize,
}

impl SweepStats {
    pub fn is_empty(&self) -> bool {
        self.connections == 0 && self.statements == 0 && self.result_sets == 0
    }
}

pub struct Registry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    statements: DashMap<StatementId, SharedStatement>,
    result_sets: DashMap<ResultSetId, SharedCursor>,
    idle_timeout: Duration,
}

impl Registry {
    pub fn new(idle_timeout: Duration) -> Self {
        Registry {
            connections: DashMap::new(),
            statements: DashMap::new(),
            result_sets: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn put_connection(&self, id: ConnectionId, conn: Box<dyn DriverConnection>) -> SharedConnection {
        let conn = Arc::new(Mutex::new(conn));
        self.connections.insert(
            id,
            ConnectionHandle {
                conn: conn.clone(),
                last_activity: Instant::now(),
            },
        );
        conn
    }

    pub fn connection(&self, id: &ConnectionId) -> Result<SharedConnection> {
        self.connections
            .get(id)
            .map(|h| h.conn.clone())
            .ok_or_else(|| ProxySrvError::ConnectionNotFound(id.clone()))
    }

    pub fn remove_connection(&self, id: &ConnectionId) -> Option<SharedConnection> {
        self.connections.remove(id).map(|(_, h)| h.conn)
    }

    pub fn put_statement(&self, id: StatementId, stmt: Box<dyn DriverStatement>) -> SharedStatement {
        let stmt = Arc::new(Mutex::new(stmt));
        self.statements.insert(id, stmt.clone());
        stmt
    }

    pub fn statement(&self, id: &StatementId) -> Result<SharedStatement> {
        self.statements
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| ProxySrvError::StatementNotFound(id.to_string()))
    }

    pub fn remove_statement(&self, id: &StatementId) -> Option<SharedStatement> {
        self.statements.remove(id).map(|(_, s)| s)
    }

    pub fn put_result_set(&self, id: ResultSetId, cursor: DecryptingCursor) -> SharedCursor {
        let cursor = Arc::new(Mutex::new(cursor));
        self.result_sets.insert(id, cursor.clone());
        cursor
    }

    pub fn result_set(&self, id: &ResultSetId) -> Result<SharedCursor> {
        self.result_sets
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| ProxySrvError::ResultSetNotFound(id.to_string()))
    }

    pub fn remove_result_set(&self, id: &ResultSetId) -> Option<SharedCursor> {
        self.result_sets.remove(id).map(|(_, c)| c)
    }

    /// Refresh the last activity time of a connection.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(mut handle) = self.connections.get_mut(id) {
            handle.last_activity = Instant::now();
        }
    }

    /// Check if a connection has been idle for longer than the timeout.
    ///
    /// Unknown connections are never expired.
    pub fn is_expired(&self, id: &ConnectionId) -> bool {
        match self.connections.get(id) {
            Some(handle) => handle.last_activity.elapsed() > self.idle_timeout,
            None => false,
        }
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn num_statements(&self) -> usize {
        self.statements.len()
    }

    pub fn num_result_sets(&self) -> usize {
        self.result_sets.len()
    }

    /// Close and remove a result set. Returns false if it wasn't registered.
    pub async fn close_result_set(&self, id: &ResultSetId) -> bool {
        match self.remove_result_set(id) {
            Some(cursor) => {
                if let Err(e) = cursor.lock().await.close().await {
                    warn!(%e, result_set_id = %id, "error closing result set");
                }
                true
            }
            None => false,
        }
    }

    /// Close and remove a statement along with every result set it owns.
    /// Returns false if the statement wasn't registered.
    pub async fn close_statement(&self, id: &StatementId) -> bool {
        for rs_id in self.owned_result_sets(id.as_str()) {
            self.close_result_set(&rs_id).await;
        }
        match self.remove_statement(id) {
            Some(stmt) => {
                if let Err(e) = stmt.lock().await.close().await {
                    warn!(%e, statement_id = %id, "error closing statement");
                }
                true
            }
            None => false,
        }
    }

    /// Close and remove a connection and everything it owns.
    ///
    /// Failures closing individual resources are logged and otherwise
    /// ignored.
    pub async fn cascade_close(&self, id: &ConnectionId) {
        for rs_id in self.owned_result_sets(id.as_str()) {
            self.close_result_set(&rs_id).await;
        }
        for stmt_id in self.owned_statements(id.as_str()) {
            self.close_statement(&stmt_id).await;
        }

        if let Some(conn) = self.remove_connection(id) {
            let mut conn = conn.lock().await;
            if !conn.is_closed() {
                if let Err(e) = conn.close().await {
                    warn!(%e, conn_id = %id, "error closing connection");
                }
            }
            info!(conn_id = %id, "connection closed");
        }
    }

    /// Remove entries whose underlying resource is already closed.
    ///
    /// Resources that are in use by a request are skipped. Nothing that is
    /// still open is closed here.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let before = self.result_sets.len();
        self.result_sets.retain(|_, cursor| !cursor_closed(cursor));
        stats.result_sets = before.saturating_sub(self.result_sets.len());

        let before = self.statements.len();
        self.statements.retain(|_, stmt| !statement_closed(stmt));
        stats.statements = before.saturating_sub(self.statements.len());

        let closed: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .conn
                    .try_lock()
                    .map(|c| c.is_closed())
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in closed {
            debug!(conn_id = %id, "sweeping closed connection");
            let owned_rs = self.owned_result_sets(id.as_str()).len();
            let owned_stmts = self.owned_statements(id.as_str()).len();
            self.cascade_close(&id).await;
            stats.connections += 1;
            stats.result_sets += owned_rs;
            stats.statements += owned_stmts;
        }

        stats
    }

    fn owned_result_sets(&self, owner: &str) -> Vec<ResultSetId> {
        self.result_sets
            .iter()
            .filter(|e| is_prefixed_by(e.key().as_str(), owner))
            .map(|e| e.key().clone())
            .collect()
    }

    fn owned_statements(&self, owner: &str) -> Vec<StatementId> {
        self.statements
            .iter()
            .filter(|e| is_prefixed_by(e.key().as_str(), owner))
            .map(|e| e.key().clone())
            .collect()
    }
}

fn cursor_closed(cursor: &SharedCursor) -> bool {
    cursor.try_lock().map(|c| c.is_closed()).unwrap_or(false)
}

fn statement_closed(stmt: &SharedStatement) -> bool {
    stmt.try_lock().map(|s| s.is_closed()).unwrap_or(false)
}
