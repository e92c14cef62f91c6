//! Textual rewriting of SQL written for MySQL into other database dialects.
//!
//! Rewriting is a plain string transformation. Nothing here parses SQL, so
//! rules only target the handful of statements clients commonly issue that
//! other databases spell differently.
pub mod dialect;
pub mod errors;
pub mod rules;

mod rewriter;

pub use dialect::Dialect;
pub use rewriter::{Rewriter, rewrite_call};
