use chrono::{DateTime, Utc};
use proxyproto::codec::client::FramedClientConn;
use proxyproto::messages::{Request, Response};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::{ClientError, Result};

/// A socket to the proxy server carrying one request/response exchange at a
/// time.
pub struct ProxyTransport {
    conn: Mutex<FramedClientConn<TcpStream>>,
}

impl ProxyTransport {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(peer = ?stream.peer_addr().ok(), "connected to proxy");
        Ok(ProxyTransport {
            conn: Mutex::new(FramedClientConn::new(stream)),
        })
    }

    /// Send a request and wait for its response.
    ///
    /// Exception responses are returned as [`ClientError::Server`], and a
    /// response of a different kind than the request is an error.
    pub async fn request(&self, req: Request) -> Result<Response> {
        let expected = req.kind;
        let resp = self.conn.lock().await.roundtrip(req).await?;
        let resp = resp.into_result().map_err(ClientError::Server)?;
        if resp.kind != expected {
            return Err(ClientError::UnexpectedResponse {
                expected,
                got: resp.kind,
            });
        }
        Ok(resp)
    }

    /// Check the server is alive, returning its current time.
    pub async fn ping(&self) -> Result<DateTime<Utc>> {
        let resp = self.request(Request::ping()).await?;
        resp.timestamp
            .and_then(DateTime::from_timestamp_millis)
            .ok_or(ClientError::MalformedResponse("ping response without timestamp"))
    }
}
