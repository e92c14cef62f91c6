//! Transparent field level encryption.
//!
//! Parameters bound to a statement are encrypted according to the statement's
//! shape ([`policy`]), and values read back are decrypted whenever they look
//! like ciphertext ([`reveal`]). Callers never need to know which columns are
//! encrypted at rest.
pub mod cipher;
pub mod errors;
pub mod policy;
pub mod reveal;

pub use cipher::FieldCipher;
