use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fieldcrypt::FieldCipher;
use fieldcrypt::policy::{ExecMode, ParamPolicy};
use futures::FutureExt;
use proxyproto::codec::server::{FramedConn, RequestCodec};
use proxyproto::ids::{ConnectionId, ResultSetId, StatementId};
use proxyproto::messages::{MessageKind, Request, Response};
use proxyproto::value::Value;
use proxyutil::metadata_constants::{PASSWORD_KEY, REAL_URL_KEY, USER_KEY};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::cursor::DecryptingCursor;
use crate::driver::{DriverManager, PrepareOptions};
use crate::errors::{ProxySrvError, Result};
use crate::registry::{Registry, SharedStatement};

/// Executes proxy requests against real databases on behalf of clients.
pub struct ProxyHandler {
    config: ServerConfig,
    drivers: DriverManager,
    cipher: Arc<FieldCipher>,
    registry: Arc<Registry>,
}

impl ProxyHandler {
    pub fn new(config: ServerConfig, drivers: DriverManager, cipher: FieldCipher) -> Self {
        let registry = Arc::new(Registry::new(config.idle_timeout));
        ProxyHandler {
            config,
            drivers,
            cipher: Arc::new(cipher),
            registry,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serve a single client connection until it disconnects.
    ///
    /// Connections opened through this client are closed once it goes away,
    /// whether that's a clean disconnect or a transport error.
    pub async fn handle_connection<C>(&self, conn: C) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let codec = RequestCodec::new(self.config.max_frame_size);
        let mut framed = FramedConn::with_codec(conn, codec);
        let mut session = ClientSession::default();

        let result = self.run(&mut framed, &mut session).await;

        for conn_id in session.owned.drain(..) {
            debug!(%conn_id, "releasing connection owned by ended session");
            self.registry.cascade_close(&conn_id).await;
        }

        result
    }

    async fn run<C>(&self, framed: &mut FramedConn<C>, session: &mut ClientSession) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let req = match framed.read().await? {
                Some(req) => req,
                None => return Ok(()),
            };

            let conn_id = req.connection_id.clone();
            if let Some(id) = &conn_id {
                if self.registry.is_expired(id) {
                    warn!(conn_id = %id, kind = %req.kind, "request against expired connection");
                    let err = ProxySrvError::ConnectionExpired(id.clone());
                    framed.send(Response::exception(err.to_error_info())).await?;
                    continue;
                }
            }

            let kind = req.kind;
            let resp = match self.dispatch_guarded(req, session).await {
                Ok(resp) => resp,
                Err(e) => {
                    debug!(%e, %kind, "request failed");
                    Response::exception(e.to_error_info())
                }
            };
            framed.send(resp).await?;

            if let Some(id) = &conn_id {
                self.registry.touch(id);
            }
        }
    }

    /// Dispatch a request, turning a panic while handling it into an internal
    /// error so the session stays up.
    async fn dispatch_guarded(
        &self,
        req: Request,
        session: &mut ClientSession,
    ) -> Result<Response> {
        let kind = req.kind;
        match AssertUnwindSafe(self.dispatch(req, session))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!(%kind, %msg, "request handler panicked");
                Err(ProxySrvError::Internal(format!(
                    "{kind} request panicked: {msg}"
                )))
            }
        }
    }

    async fn dispatch(&self, req: Request, session: &mut ClientSession) -> Result<Response> {
        trace!(kind = %req.kind, "dispatching request");
        match req.kind {
            MessageKind::OpenConnection => self.open_connection(req, session).await,
            MessageKind::ExecuteQuery => self.execute_query(req).await,
            MessageKind::FetchRows => self.fetch_rows(req).await,
            MessageKind::ExecuteUpdate => self.execute_update(req).await,
            MessageKind::CloseStatement => self.close_statement(req).await,
            MessageKind::CloseResultSet => self.close_result_set(req).await,
            MessageKind::CloseConnection => self.close_connection(req, session).await,
            MessageKind::Ping => Ok(Response {
                timestamp: Some(chrono::Utc::now().timestamp_millis()),
                ..Response::ack(MessageKind::Ping)
            }),
            MessageKind::Exception => Err(ProxySrvError::Protocol(
                "exception is not a valid request kind".to_string(),
            )),
        }
    }

    async fn open_connection(
        &self,
        req: Request,
        session: &mut ClientSession,
    ) -> Result<Response> {
        let url = req
            .extra_str(REAL_URL_KEY)
            .ok_or_else(|| ProxySrvError::Protocol(format!("missing '{REAL_URL_KEY}'")))?;
        let user = req.extra_str(USER_KEY);
        let password = req.extra_str(PASSWORD_KEY);

        let conn = self
            .drivers
            .connect(&url, user.as_deref(), password.as_deref())
            .await?;

        let id = ConnectionId::generate();
        self.registry.put_connection(id.clone(), conn);
        session.owned.push(id.clone());
        info!(conn_id = %id, %url, "opened connection");

        Ok(Response {
            rows: vec![vec![Value::String(id.into_string())]],
            ..Response::ack(MessageKind::OpenConnection)
        })
    }

    async fn execute_query(&self, req: Request) -> Result<Response> {
        let conn_id = required_conn(&req)?;
        let sql = required_sql(&req)?;
        let conn = self.registry.connection(&conn_id)?;

        let stmt = conn
            .lock()
            .await
            .prepare(&sql, PrepareOptions::scrollable_updatable())
            .await?;
        let stmt_id = StatementId::generate(&conn_id);
        let stmt = self.registry.put_statement(stmt_id.clone(), stmt);

        let result = self
            .run_query(&stmt, &stmt_id, &sql, &req, self.config.fetch_size(req.fetch_size))
            .await;
        if result.is_err() {
            self.registry.close_statement(&stmt_id).await;
        }
        result
    }

    async fn run_query(
        &self,
        stmt: &SharedStatement,
        stmt_id: &StatementId,
        sql: &str,
        req: &Request,
        fetch_size: usize,
    ) -> Result<Response> {
        let cursor = {
            let mut stmt = stmt.lock().await;
            let declared = stmt.parameter_count();
            let policy = ParamPolicy::for_sql(sql, ExecMode::Query);
            for (pos, val) in policy.apply(&self.cipher, &req.params, declared)? {
                stmt.bind(pos, val)?;
            }
            stmt.execute_query().await?
        };

        let cursor = DecryptingCursor::new(cursor, self.cipher.clone());
        let column_names = cursor.column_names();
        let rs_id = ResultSetId::generate(stmt_id);
        let cursor = self.registry.put_result_set(rs_id.clone(), cursor);

        let (rows, has_more_rows) = cursor.lock().await.fetch(fetch_size).await?;
        debug!(statement_id = %stmt_id, rows = rows.len(), has_more_rows, "executed query");

        Ok(Response {
            rows,
            column_names: Some(column_names),
            has_more_rows,
            statement_id: Some(stmt_id.clone()),
            result_set_id: Some(rs_id),
            ..Response::ack(MessageKind::ExecuteQuery)
        })
    }

    async fn fetch_rows(&self, req: Request) -> Result<Response> {
        let rs_id = req
            .result_set_id
            .clone()
            .ok_or_else(|| ProxySrvError::Protocol("ResultSet ID not provided".to_string()))?;
        check_owner(&req, rs_id.as_str(), || {
            ProxySrvError::ResultSetNotFound(rs_id.to_string())
        })?;

        let cursor = self.registry.result_set(&rs_id)?;
        let fetch_size = self.config.fetch_size(req.fetch_size);
        let (rows, has_more_rows) = cursor.lock().await.fetch(fetch_size).await?;
        trace!(result_set_id = %rs_id, rows = rows.len(), has_more_rows, "fetched rows");

        Ok(Response {
            rows,
            has_more_rows,
            result_set_id: Some(rs_id),
            ..Response::ack(MessageKind::FetchRows)
        })
    }

    async fn execute_update(&self, req: Request) -> Result<Response> {
        let conn_id = required_conn(&req)?;
        let sql = required_sql(&req)?;
        let conn = self.registry.connection(&conn_id)?;

        let stmt = conn
            .lock()
            .await
            .prepare(&sql, PrepareOptions::default())
            .await?;
        let stmt_id = StatementId::generate(&conn_id);
        let stmt = self.registry.put_statement(stmt_id.clone(), stmt);

        let result = async {
            let mut stmt = stmt.lock().await;
            let declared = stmt.parameter_count();
            let policy = ParamPolicy::for_sql(&sql, ExecMode::Update);
            for (pos, val) in policy.apply(&self.cipher, &req.params, declared)? {
                stmt.bind(pos, val)?;
            }
            Ok::<_, ProxySrvError>(stmt.execute_update().await?)
        }
        .await;

        // Update statements are released as soon as they've run.
        self.registry.close_statement(&stmt_id).await;

        let update_count = result?;
        debug!(statement_id = %stmt_id, update_count, "executed update");

        Ok(Response {
            update_count: i64::try_from(update_count).unwrap_or(i64::MAX),
            statement_id: Some(stmt_id),
            ..Response::ack(MessageKind::ExecuteUpdate)
        })
    }

    async fn close_statement(&self, req: Request) -> Result<Response> {
        if let Some(stmt_id) = &req.statement_id {
            check_owner(&req, stmt_id.as_str(), || {
                ProxySrvError::StatementNotFound(stmt_id.to_string())
            })?;
            if !self.registry.close_statement(stmt_id).await {
                debug!(statement_id = %stmt_id, "close of unknown statement");
            }
        }
        Ok(Response::ack(MessageKind::CloseStatement))
    }

    async fn close_result_set(&self, req: Request) -> Result<Response> {
        if let Some(rs_id) = &req.result_set_id {
            check_owner(&req, rs_id.as_str(), || {
                ProxySrvError::ResultSetNotFound(rs_id.to_string())
            })?;
            if !self.registry.close_result_set(rs_id).await {
                debug!(result_set_id = %rs_id, "close of unknown result set");
            }
        }
        Ok(Response::ack(MessageKind::CloseResultSet))
    }

    async fn close_connection(
        &self,
        req: Request,
        session: &mut ClientSession,
    ) -> Result<Response> {
        let conn_id = required_conn(&req)?;
        self.registry.cascade_close(&conn_id).await;
        session.owned.retain(|id| id != &conn_id);
        Ok(Response::ack(MessageKind::CloseConnection))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// State tied to a single client transport.
#[derive(Debug, Default)]
struct ClientSession {
    /// Connections opened over this transport.
    owned: Vec<ConnectionId>,
}

fn required_conn(req: &Request) -> Result<ConnectionId> {
    req.connection_id
        .clone()
        .ok_or_else(|| ProxySrvError::Protocol(format!("{} requires a connection id", req.kind)))
}

fn required_sql(req: &Request) -> Result<String> {
    req.sql
        .clone()
        .ok_or_else(|| ProxySrvError::Protocol(format!("{} requires sql", req.kind)))
}

/// Reject ids that don't belong to the connection named on the request.
fn check_owner<F>(req: &Request, id: &str, not_found: F) -> Result<()>
where
    F: FnOnce() -> ProxySrvError,
{
    match &req.connection_id {
        Some(conn_id) if !proxyproto::ids::is_prefixed_by(id, conn_id.as_str()) => {
            Err(not_found())
        }
        _ => Ok(()),
    }
}
