//! Client stub for the SQL proxy.
//!
//! A [`ProxyConnection`] opens a connection on the real database through the
//! proxy server. Statements and cursors created from it only build requests
//! tagged with the connection's id; all work happens on the server.
pub mod connection;
pub mod cursor;
pub mod errors;
pub mod proxy_url;
pub mod statement;
pub mod transport;

pub use connection::ProxyConnection;
pub use cursor::{ColumnIndex, ProxyCursor};
pub use proxy_url::{ConnectProps, ProxyUrl};
pub use statement::{ExecuteResult, ProxyStatement};
pub use transport::ProxyTransport;
