use std::io;

use fieldcrypt::errors::CryptError;
use proxyproto::errinfo::{ErrorInfo, ErrorKind};
use proxyproto::errors::ProtoError;
use proxyproto::ids::ConnectionId;

use crate::driver::DriverError;

pub type Result<T, E = ProxySrvError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ProxySrvError {
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Statement not found: {0}")]
    StatementNotFound(String),

    #[error("ResultSet not found: {0}")]
    ResultSetNotFound(String),

    #[error("Connection expired: {0}")]
    ConnectionExpired(ConnectionId),

    #[error(transparent)]
    Database(#[from] DriverError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Encryption(#[from] CryptError),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxySrvError {
    /// Capture this error as a value that can be sent to the client.
    pub fn to_error_info(&self) -> ErrorInfo {
        let info = match self {
            ProxySrvError::ConnectionNotFound(_) => {
                ErrorInfo::new(ErrorKind::ConnectionNotFound, self.to_string())
            }
            ProxySrvError::StatementNotFound(_) => {
                ErrorInfo::new(ErrorKind::StatementNotFound, self.to_string())
            }
            ProxySrvError::ResultSetNotFound(_) => {
                ErrorInfo::new(ErrorKind::ResultSetNotFound, self.to_string())
            }
            ProxySrvError::ConnectionExpired(_) => {
                ErrorInfo::new(ErrorKind::ConnectionExpired, self.to_string())
            }
            ProxySrvError::Database(e) => {
                let mut info = ErrorInfo::new(ErrorKind::Database, e.message.clone())
                    .with_error_code(e.error_code);
                if let Some(state) = &e.sql_state {
                    info = info.with_sql_state(state.clone());
                }
                if let Some(cause) = &e.cause {
                    info = info.with_cause(cause.clone());
                }
                info
            }
            ProxySrvError::Protocol(_) => ErrorInfo::new(ErrorKind::Protocol, self.to_string()),
            ProxySrvError::Encryption(e) => {
                ErrorInfo::new(ErrorKind::Encryption, self.to_string()).with_cause(e.to_string())
            }
            ProxySrvError::Internal(_) | ProxySrvError::Proto(_) | ProxySrvError::Io(_) => {
                ErrorInfo::new(ErrorKind::Internal, format!("Proxy server error: {self}"))
                    .with_cause(self.to_string())
            }
        };
        info.with_captured_backtrace()
    }
}
