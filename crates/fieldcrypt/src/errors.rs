use proxyproto::value::{CastError, ValueType};

pub type Result<T, E = CryptError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum CryptError {
    #[error("cipher key must be {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("failed to decrypt value: {0}")]
    Decrypt(&'static str),

    #[error("{0} value has no text form to encrypt")]
    NotText(&'static str),

    #[error("decrypted value cannot be read as {to}: {source}")]
    Cast {
        to: ValueType,
        #[source]
        source: CastError,
    },
}
