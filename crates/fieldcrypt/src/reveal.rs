//! Decrypting values read back from the database.
use proxyproto::value::{Value, ValueType};

use crate::cipher::FieldCipher;
use crate::errors::{CryptError, Result};

/// Reveal a single cell.
///
/// The cell is read as text. If that text is ciphertext and decrypts under the
/// cipher's key, the plaintext comes back as a string, or as bytes when it
/// isn't UTF-8. Anything else is returned untouched.
pub fn reveal(cipher: &FieldCipher, value: &Value) -> Value {
    decrypted(cipher, value).unwrap_or_else(|| value.clone())
}

/// Reveal a cell as the requested type.
///
/// Decrypted plaintext is parsed into `to`; cells that weren't encrypted are
/// converted from their stored type.
pub fn reveal_as(cipher: &FieldCipher, value: &Value, to: ValueType) -> Result<Value> {
    let revealed = reveal(cipher, value);
    revealed
        .cast(to)
        .map_err(|source| CryptError::Cast { to, source })
}

/// Reveal every cell in a row.
pub fn reveal_row(cipher: &FieldCipher, row: Vec<Value>) -> Vec<Value> {
    row.into_iter()
        .map(|v| decrypted(cipher, &v).unwrap_or(v))
        .collect()
}

fn decrypted(cipher: &FieldCipher, value: &Value) -> Option<Value> {
    if matches!(value, Value::Null | Value::Bool(_) | Value::Float(_)) {
        // Text forms of these can never be canonical base64 of a full block.
        return None;
    }
    let text = value.to_text()?;
    if !cipher.is_cipher_text(&text) {
        return None;
    }
    let plain = cipher.try_decrypt_bytes(&text).ok()?;
    Some(match String::from_utf8(plain) {
        Ok(s) => Value::String(s),
        Err(e) => Value::Bytes(e.into_bytes()),
    })
}
