use bytes::BytesMut;
use futures::{SinkExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::trace;

use super::{
    decode_request_body, encode_response_body, split_frame, write_frame, Cursor,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::errors::{ProtoError, Result};
use crate::messages::{Request, Response};

/// Server half of the codec: decodes requests, encodes responses.
#[derive(Debug, Clone)]
pub struct RequestCodec {
    max_frame_size: usize,
}

impl RequestCodec {
    pub fn new(max_frame_size: usize) -> Self {
        RequestCodec { max_frame_size }
    }
}

impl Default for RequestCodec {
    fn default() -> Self {
        RequestCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Encoder<Response> for RequestCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<()> {
        write_frame(dst, self.max_frame_size, |dst| {
            encode_response_body(&item, dst)
        })
    }
}

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let body = match split_frame(src, self.max_frame_size)? {
            Some(body) => body,
            None => return Ok(None),
        };
        let mut buf = Cursor::new(&body);
        Ok(Some(decode_request_body(&mut buf)?))
    }
}

/// A server side connection that reads requests and writes responses.
pub struct FramedConn<C> {
    conn: Framed<C, RequestCodec>,
}

impl<C> FramedConn<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: C) -> Self {
        Self::with_codec(conn, RequestCodec::default())
    }

    pub fn with_codec(conn: C, codec: RequestCodec) -> Self {
        FramedConn {
            conn: Framed::new(conn, codec),
        }
    }

    /// Reads a single, complete request.
    ///
    /// Returns `None` once the peer closes the connection.
    pub async fn read(&mut self) -> Result<Option<Request>> {
        let msg = self.conn.try_next().await?;
        match &msg {
            Some(msg) => trace!(kind = %msg.kind, conn_id = ?msg.connection_id, "read request"),
            None => trace!("read request (None)"),
        };
        Ok(msg)
    }

    /// Sends a single response.
    pub async fn send(&mut self, msg: Response) -> Result<()> {
        trace!(kind = %msg.kind, rows = msg.rows.len(), "sending response");
        self.conn.send(msg).await
    }
}
