use std::io;

pub type Result<T, E = ProtoError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("message larger than frame limit, size: {size}, limit: {limit}")]
    MsgTooLarge { size: usize, limit: usize },

    #[error("unexpected end of message, needed {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("invalid message kind: {0}")]
    InvalidMessageKind(u8),

    #[error("invalid value tag: {0}")]
    InvalidValueTag(u8),

    #[error("invalid error kind: {0}")]
    InvalidErrorKind(u8),

    #[error("invalid {0} value on the wire")]
    InvalidTemporal(&'static str),

    #[error("{0} bytes left over after decoding message")]
    TrailingBytes(usize),

    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error(transparent)]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    InvalidDecimal(#[from] rust_decimal::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
