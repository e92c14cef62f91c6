//! Opaque resource identifiers.
//!
//! Statement ids are prefixed by the id of the connection that owns them, and
//! result set ids by the id of their statement. Ownership checks and cascading
//! closes are plain prefix scans over these strings.
use std::fmt;

use uuid::Uuid;

/// Separator placed between an owner id and the generated suffix.
pub const ID_SEPARATOR: char = '_';

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }

            /// Check if this id was generated underneath `owner`.
            pub fn is_owned_by(&self, owner: &str) -> bool {
                is_prefixed_by(&self.0, owner)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

opaque_id!(
    /// Identifies a connection held open by the proxy server.
    ConnectionId
);

opaque_id!(
    /// Identifies a prepared statement, namespaced as `<connId>_<uuid>`.
    StatementId
);

opaque_id!(
    /// Identifies an open cursor, namespaced as `<stmtId>_<uuid>`.
    ResultSetId
);

impl ConnectionId {
    pub fn generate() -> Self {
        ConnectionId(Uuid::new_v4().to_string())
    }
}

impl StatementId {
    pub fn generate(owner: &ConnectionId) -> Self {
        StatementId(format!("{owner}{ID_SEPARATOR}{}", Uuid::new_v4()))
    }
}

impl ResultSetId {
    pub fn generate(owner: &StatementId) -> Self {
        ResultSetId(format!("{owner}{ID_SEPARATOR}{}", Uuid::new_v4()))
    }
}

/// Returns true if `id` starts with `owner` followed by the separator.
pub fn is_prefixed_by(id: &str, owner: &str) -> bool {
    id.len() > owner.len()
        && id.starts_with(owner)
        && id[owner.len()..].starts_with(ID_SEPARATOR)
}
