use std::collections::BTreeMap;
use std::fmt;

use crate::errinfo::ErrorInfo;
use crate::errors::ProtoError;
use crate::ids::{ConnectionId, ResultSetId, StatementId};
use crate::value::Value;

/// Discriminant shared by requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    OpenConnection,
    ExecuteQuery,
    ExecuteUpdate,
    FetchRows,
    CloseStatement,
    CloseResultSet,
    CloseConnection,
    Exception,
    Ping,
}

impl MessageKind {
    pub const fn code(&self) -> u8 {
        match self {
            MessageKind::OpenConnection => 1,
            MessageKind::ExecuteQuery => 2,
            MessageKind::ExecuteUpdate => 3,
            MessageKind::FetchRows => 4,
            MessageKind::CloseStatement => 5,
            MessageKind::CloseResultSet => 6,
            MessageKind::CloseConnection => 7,
            MessageKind::Exception => 8,
            MessageKind::Ping => 9,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::OpenConnection => "OPEN_CONN",
            MessageKind::ExecuteQuery => "EXEC_QUERY",
            MessageKind::ExecuteUpdate => "EXEC_UPDATE",
            MessageKind::FetchRows => "FETCH_ROWS",
            MessageKind::CloseStatement => "CLOSE_STATEMENT",
            MessageKind::CloseResultSet => "CLOSE_RESULT_SET",
            MessageKind::CloseConnection => "CLOSE_CONN",
            MessageKind::Exception => "EXCEPTION",
            MessageKind::Ping => "PING",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MessageKind::OpenConnection,
            2 => MessageKind::ExecuteQuery,
            3 => MessageKind::ExecuteUpdate,
            4 => MessageKind::FetchRows,
            5 => MessageKind::CloseStatement,
            6 => MessageKind::CloseResultSet,
            7 => MessageKind::CloseConnection,
            8 => MessageKind::Exception,
            9 => MessageKind::Ping,
            other => return Err(ProtoError::InvalidMessageKind(other)),
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single request sent from the client to the proxy server.
///
/// Positional params are keyed by their 1-based position.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub kind: MessageKind,
    pub connection_id: Option<ConnectionId>,
    pub statement_id: Option<StatementId>,
    pub result_set_id: Option<ResultSetId>,
    pub sql: Option<String>,
    pub params: BTreeMap<u32, Value>,
    pub fetch_size: i32,
    /// Out of band parameters, only used when opening a connection.
    pub extra: BTreeMap<String, Value>,
}

impl Request {
    pub fn new(kind: MessageKind) -> Self {
        Request {
            kind,
            connection_id: None,
            statement_id: None,
            result_set_id: None,
            sql: None,
            params: BTreeMap::new(),
            fetch_size: 0,
            extra: BTreeMap::new(),
        }
    }

    pub fn open_connection(extra: BTreeMap<String, Value>) -> Self {
        Request {
            extra,
            ..Request::new(MessageKind::OpenConnection)
        }
    }

    pub fn execute_query(
        conn: ConnectionId,
        sql: impl Into<String>,
        params: BTreeMap<u32, Value>,
        fetch_size: i32,
    ) -> Self {
        Request {
            connection_id: Some(conn),
            sql: Some(sql.into()),
            params,
            fetch_size,
            ..Request::new(MessageKind::ExecuteQuery)
        }
    }

    pub fn execute_update(
        conn: ConnectionId,
        sql: impl Into<String>,
        params: BTreeMap<u32, Value>,
    ) -> Self {
        Request {
            connection_id: Some(conn),
            sql: Some(sql.into()),
            params,
            ..Request::new(MessageKind::ExecuteUpdate)
        }
    }

    pub fn fetch_rows(conn: ConnectionId, result_set: ResultSetId, fetch_size: i32) -> Self {
        Request {
            connection_id: Some(conn),
            result_set_id: Some(result_set),
            fetch_size,
            ..Request::new(MessageKind::FetchRows)
        }
    }

    pub fn close_statement(conn: ConnectionId, statement: StatementId) -> Self {
        Request {
            connection_id: Some(conn),
            statement_id: Some(statement),
            ..Request::new(MessageKind::CloseStatement)
        }
    }

    pub fn close_result_set(conn: ConnectionId, result_set: ResultSetId) -> Self {
        Request {
            connection_id: Some(conn),
            result_set_id: Some(result_set),
            ..Request::new(MessageKind::CloseResultSet)
        }
    }

    pub fn close_connection(conn: ConnectionId) -> Self {
        Request {
            connection_id: Some(conn),
            ..Request::new(MessageKind::CloseConnection)
        }
    }

    pub fn ping() -> Self {
        Request::new(MessageKind::Ping)
    }

    /// Get an extra parameter as a string, if it's set.
    pub fn extra_str(&self, key: &str) -> Option<String> {
        self.extra.get(key).and_then(Value::to_text)
    }
}

/// A single response sent from the proxy server to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub kind: MessageKind,
    pub rows: Vec<Vec<Value>>,
    pub column_names: Option<Vec<String>>,
    pub update_count: i64,
    pub has_more_rows: bool,
    pub statement_id: Option<StatementId>,
    pub result_set_id: Option<ResultSetId>,
    /// Server time in milliseconds since the unix epoch.
    pub timestamp: Option<i64>,
    /// Only set for the exception kind.
    pub error: Option<ErrorInfo>,
}

impl Response {
    /// An empty acknowledgement of the given kind.
    pub fn ack(kind: MessageKind) -> Self {
        Response {
            kind,
            rows: Vec::new(),
            column_names: None,
            update_count: 0,
            has_more_rows: false,
            statement_id: None,
            result_set_id: None,
            timestamp: None,
            error: None,
        }
    }

    pub fn exception(error: ErrorInfo) -> Self {
        Response {
            error: Some(error),
            ..Response::ack(MessageKind::Exception)
        }
    }

    pub fn is_exception(&self) -> bool {
        self.kind == MessageKind::Exception
    }

    /// Turn an exception response into its error.
    pub fn into_result(self) -> Result<Response, ErrorInfo> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}
