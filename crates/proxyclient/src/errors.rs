use std::io;

use proxyproto::errinfo::{ErrorInfo, ErrorKind};
use proxyproto::errors::ProtoError;
use proxyproto::messages::MessageKind;
use proxyproto::value::CastError;
use sqlrewrite::errors::RewriteError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An error raised on the server, reconstructed locally.
    #[error("{0}")]
    Server(ErrorInfo),

    #[error("Connection already closed")]
    ConnectionClosed,

    #[error("Statement already closed")]
    StatementClosed,

    #[error("Cursor already closed")]
    CursorClosed,

    #[error("Unexpected response from proxy, expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: MessageKind,
        got: MessageKind,
    },

    #[error("Malformed response from proxy: {0}")]
    MalformedResponse(&'static str),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column index {index} out of range, cursor has {count} columns")]
    ColumnOutOfRange { index: usize, count: usize },

    #[error("Cursor is not positioned on a row")]
    NoCurrentRow,

    #[error("Invalid parameter position: {0}")]
    InvalidParameter(u32),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error("Invalid proxy url: {0}")]
    Url(String),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error(transparent)]
    Dialect(#[from] RewriteError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// The server side error, if this error came from the server.
    pub fn server_error(&self) -> Option<&ErrorInfo> {
        match self {
            ClientError::Server(info) => Some(info),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.server_error().map(ErrorInfo::kind)
    }

    pub fn sql_state(&self) -> Option<&str> {
        self.server_error().and_then(ErrorInfo::sql_state)
    }

    pub fn error_code(&self) -> Option<i32> {
        self.server_error().map(ErrorInfo::error_code)
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
