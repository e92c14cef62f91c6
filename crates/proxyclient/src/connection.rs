use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use proxyproto::errinfo::ErrorKind;
use proxyproto::ids::ConnectionId;
use proxyproto::messages::Request;
use proxyproto::value::Value;
use proxyutil::metadata_constants::{PASSWORD_KEY, REAL_URL_KEY, USER_KEY};
use sqlrewrite::{Dialect, Rewriter};
use tracing::{debug, info};

use crate::errors::{ClientError, Result};
use crate::proxy_url::ProxyUrl;
use crate::statement::ProxyStatement;
use crate::transport::ProxyTransport;

/// State shared between a connection and the statements and cursors created
/// from it.
pub(crate) struct ConnShared {
    pub(crate) transport: ProxyTransport,
    pub(crate) id: ConnectionId,
    closed: AtomicBool,
}

impl ConnShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }
}

/// A connection on the real database, held open by the proxy server.
pub struct ProxyConnection {
    shared: Arc<ConnShared>,
    rewrite: Option<(Rewriter, Dialect)>,
}

impl ProxyConnection {
    /// Parse the url and connect.
    pub async fn open(url: &str) -> Result<Self> {
        Self::connect(&ProxyUrl::parse(url)?).await
    }

    /// Connect to the proxy and open a connection on the real database.
    pub async fn connect(url: &ProxyUrl) -> Result<Self> {
        let transport = ProxyTransport::connect(url.addr()).await?;

        let mut extra = BTreeMap::new();
        extra.insert(REAL_URL_KEY.to_string(), Value::from(url.real_url.as_str()));
        if let Some(user) = &url.user {
            extra.insert(USER_KEY.to_string(), Value::from(user.as_str()));
        }
        if let Some(password) = &url.password {
            extra.insert(PASSWORD_KEY.to_string(), Value::from(password.as_str()));
        }

        let resp = transport.request(Request::open_connection(extra)).await?;
        let id = resp
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_str)
            .map(ConnectionId::from)
            .ok_or(ClientError::MalformedResponse(
                "open connection response without connection id",
            ))?;
        info!(conn_id = %id, proxy = %url.addr(), real_url = %url.real_url, "opened proxy connection");

        Ok(ProxyConnection {
            shared: Arc::new(ConnShared {
                transport,
                id,
                closed: AtomicBool::new(false),
            }),
            rewrite: url.dialect.map(|d| (Rewriter::new(), d)),
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.rewrite.as_ref().map(|(_, d)| *d)
    }

    /// Create a statement for the sql. No request is sent until it's executed.
    ///
    /// The sql is rewritten if the connection was opened with a dialect.
    pub fn prepare_statement(&self, sql: &str) -> Result<ProxyStatement> {
        self.shared.ensure_open()?;
        let sql = match &self.rewrite {
            Some((rewriter, dialect)) => {
                let rewritten = rewriter.rewrite(sql, *dialect);
                if rewritten != sql {
                    debug!(%dialect, original = %sql, rewritten = %rewritten, "rewrote statement");
                }
                rewritten
            }
            None => sql.to_string(),
        };
        Ok(ProxyStatement::new(self.shared.clone(), sql))
    }

    pub async fn ping(&self) -> Result<DateTime<Utc>> {
        self.shared.transport.ping().await
    }

    /// Close the connection on the server along with everything opened from it.
    ///
    /// Closing twice is a no-op. A connection the server has already expired
    /// counts as closed.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let id = self.shared.id.clone();
        match self
            .shared
            .transport
            .request(Request::close_connection(id.clone()))
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == Some(ErrorKind::ConnectionExpired) => {
                debug!(conn_id = %id, "connection already expired on server");
            }
            Err(e) => return Err(e),
        }
        self.shared.closed.store(true, Ordering::Release);
        info!(conn_id = %id, "proxy connection closed");
        Ok(())
    }
}

impl std::fmt::Debug for ProxyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConnection")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .field("dialect", &self.dialect())
            .finish()
    }
}
