//! Wire protocol shared by the proxy client and the proxy server.
//!
//! Every exchange is a single request frame followed by a single response
//! frame. Values crossing the wire are restricted to the flat set described by
//! [`value::Value`]; failures travel as [`errinfo::ErrorInfo`].
pub mod codec;
pub mod errinfo;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod value;
