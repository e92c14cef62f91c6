//! Error values that can be sent across the wire.
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use crate::errors::ProtoError;

/// Maximum number of stack frames carried by an [`ErrorInfo`].
pub const MAX_STACK_FRAMES: usize = 10;

/// Broad classification of a failure reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionNotFound,
    StatementNotFound,
    ResultSetNotFound,
    ConnectionExpired,
    Database,
    Protocol,
    Encryption,
    Internal,
}

impl ErrorKind {
    /// Code used when encoding the kind.
    pub const fn code(&self) -> u8 {
        match self {
            ErrorKind::ConnectionNotFound => 1,
            ErrorKind::StatementNotFound => 2,
            ErrorKind::ResultSetNotFound => 3,
            ErrorKind::ConnectionExpired => 4,
            ErrorKind::Database => 5,
            ErrorKind::Protocol => 6,
            ErrorKind::Encryption => 7,
            ErrorKind::Internal => 8,
        }
    }

    /// SQL state reported for this kind when the failure site doesn't provide
    /// its own.
    pub const fn default_sql_state(&self) -> Option<&'static str> {
        match self {
            ErrorKind::ConnectionNotFound => Some("08003"),
            ErrorKind::StatementNotFound => Some("26000"),
            ErrorKind::ResultSetNotFound => Some("07000"),
            ErrorKind::ConnectionExpired => Some("08006"),
            ErrorKind::Protocol => Some("08P01"),
            ErrorKind::Encryption => Some("22000"),
            ErrorKind::Database | ErrorKind::Internal => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionNotFound => "connection not found",
            ErrorKind::StatementNotFound => "statement not found",
            ErrorKind::ResultSetNotFound => "result set not found",
            ErrorKind::ConnectionExpired => "connection expired",
            ErrorKind::Database => "database error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Encryption => "encryption error",
            ErrorKind::Internal => "internal error",
        }
    }
}

impl TryFrom<u8> for ErrorKind {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => ErrorKind::ConnectionNotFound,
            2 => ErrorKind::StatementNotFound,
            3 => ErrorKind::ResultSetNotFound,
            4 => ErrorKind::ConnectionExpired,
            5 => ErrorKind::Database,
            6 => ErrorKind::Protocol,
            7 => ErrorKind::Encryption,
            8 => ErrorKind::Internal,
            other => return Err(ProtoError::InvalidErrorKind(other)),
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure captured at its origin.
///
/// Built once where the failure happens and never modified afterwards. The
/// builder methods consume `self` so an `ErrorInfo` can only be shaped before
/// it is handed off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    kind: ErrorKind,
    message: String,
    sql_state: Option<String>,
    error_code: i32,
    stack_trace: Vec<String>,
    cause_message: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ErrorInfo {
            kind,
            message: message.into(),
            sql_state: kind.default_sql_state().map(str::to_string),
            error_code: 0,
            stack_trace: Vec::new(),
            cause_message: None,
        }
    }

    /// Rebuild from decoded fields.
    pub(crate) fn from_parts(
        kind: ErrorKind,
        message: String,
        sql_state: Option<String>,
        error_code: i32,
        stack_trace: Vec<String>,
        cause_message: Option<String>,
    ) -> Self {
        ErrorInfo {
            kind,
            message,
            sql_state,
            error_code,
            stack_trace,
            cause_message,
        }
    }

    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = code;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause_message = Some(cause.into());
        self
    }

    /// Attach frames, keeping at most [`MAX_STACK_FRAMES`].
    pub fn with_stack_trace<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stack_trace = frames
            .into_iter()
            .take(MAX_STACK_FRAMES)
            .map(Into::into)
            .collect();
        self
    }

    /// Attach the current backtrace if backtrace capture is enabled for the
    /// process (`RUST_BACKTRACE`).
    pub fn with_captured_backtrace(self) -> Self {
        let bt = Backtrace::capture();
        if bt.status() != BacktraceStatus::Captured {
            return self;
        }
        let rendered = bt.to_string();
        let frames: Vec<String> = rendered
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("at "))
            .map(str::to_string)
            .collect();
        self.with_stack_trace(frames)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn stack_trace(&self) -> &[String] {
        &self.stack_trace
    }

    pub fn cause_message(&self) -> Option<&str> {
        self.cause_message.as_deref()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(state) = &self.sql_state {
            write!(f, " (sql state: {state}")?;
            if self.error_code != 0 {
                write!(f, ", code: {}", self.error_code)?;
            }
            write!(f, ")")?;
        }
        if let Some(cause) = &self.cause_message {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {}
