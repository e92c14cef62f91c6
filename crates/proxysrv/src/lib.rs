//! Server half of the SQL proxy.
//!
//! Clients speak the proxy protocol to a [`server::ProxyServer`], which runs
//! their statements on the real database through a [`driver::Driver`].
//! Parameters headed for the database are encrypted and values read back are
//! decrypted on the way out.
pub mod config;
pub mod cursor;
pub mod driver;
pub mod errors;
pub mod handler;
pub mod registry;
pub mod server;
pub mod sweep;
