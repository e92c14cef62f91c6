use bytes::BytesMut;
use futures::{SinkExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::trace;

use super::{
    decode_response_body, encode_request_body, split_frame, write_frame, Cursor,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::errors::{ProtoError, Result};
use crate::messages::{Request, Response};

/// Client half of the codec: encodes requests, decodes responses.
#[derive(Debug, Clone)]
pub struct ResponseCodec {
    max_frame_size: usize,
}

impl ResponseCodec {
    pub fn new(max_frame_size: usize) -> Self {
        ResponseCodec { max_frame_size }
    }
}

impl Default for ResponseCodec {
    fn default() -> Self {
        ResponseCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Encoder<Request> for ResponseCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<()> {
        write_frame(dst, self.max_frame_size, |dst| {
            encode_request_body(&item, dst)
        })
    }
}

impl Decoder for ResponseCodec {
    type Item = Response;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let body = match split_frame(src, self.max_frame_size)? {
            Some(body) => body,
            None => return Ok(None),
        };
        let mut buf = Cursor::new(&body);
        Ok(Some(decode_response_body(&mut buf)?))
    }
}

/// A client side connection that writes requests and reads responses.
pub struct FramedClientConn<C> {
    conn: Framed<C, ResponseCodec>,
}

impl<C> FramedClientConn<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: C) -> Self {
        FramedClientConn {
            conn: Framed::new(conn, ResponseCodec::default()),
        }
    }

    pub async fn send(&mut self, msg: Request) -> Result<()> {
        trace!(kind = %msg.kind, "sending request");
        self.conn.send(msg).await
    }

    /// Reads a single response, erroring if the server hung up.
    pub async fn read(&mut self) -> Result<Response> {
        match self.conn.try_next().await? {
            Some(msg) => {
                trace!(kind = %msg.kind, rows = msg.rows.len(), "read response");
                Ok(msg)
            }
            None => Err(ProtoError::ConnectionClosed),
        }
    }

    /// Send a request and wait for its response.
    pub async fn roundtrip(&mut self, msg: Request) -> Result<Response> {
        self.send(msg).await?;
        self.read().await
    }
}
