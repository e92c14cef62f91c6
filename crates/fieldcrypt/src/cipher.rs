use std::fmt;

use aes::Aes128;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proxyproto::value::Value;

use crate::errors::{CryptError, Result};

type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;

/// Length of the AES-128 key.
pub const KEY_LEN: usize = 16;

/// Key used when none is configured. Data written with it stays readable by
/// every deployment using the default.
pub const DEFAULT_KEY: &[u8; KEY_LEN] = b"this is password";

/// Deterministic field cipher.
///
/// AES-128 in ECB mode with PKCS#7 padding, ciphertext encoded as standard
/// padded base64. The same plaintext always produces the same ciphertext, which
/// is what lets equality lookups against encrypted columns work.
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; KEY_LEN],
}

impl FieldCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| CryptError::InvalidKeyLength {
            expected: KEY_LEN,
            got: key.len(),
        })?;
        Ok(FieldCipher { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        self.encrypt_bytes(plaintext.as_bytes())
    }

    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> String {
        let ct = Aes128EcbEnc::new(&self.key.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        STANDARD.encode(ct)
    }

    /// Decrypt `text` if it looks like ciphertext, otherwise return it as is.
    ///
    /// Never fails. Text that passes [`FieldCipher::is_cipher_text`] but doesn't
    /// decrypt to valid UTF-8 under this key is returned unchanged.
    pub fn decrypt(&self, text: &str) -> String {
        if !self.is_cipher_text(text) {
            return text.to_string();
        }
        match self.try_decrypt(text) {
            Ok(plain) => plain,
            Err(_) => text.to_string(),
        }
    }

    /// Decrypt a value that is expected to be ciphertext.
    pub fn try_decrypt(&self, text: &str) -> Result<String> {
        let bytes = self.try_decrypt_bytes(text)?;
        String::from_utf8(bytes).map_err(|_| CryptError::Decrypt("plaintext is not utf-8"))
    }

    pub fn try_decrypt_bytes(&self, text: &str) -> Result<Vec<u8>> {
        let ct = STANDARD
            .decode(text)
            .map_err(|_| CryptError::Decrypt("invalid base64"))?;
        Aes128EcbDec::new(&self.key.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ct)
            .map_err(|_| CryptError::Decrypt("invalid padding"))
    }

    /// Syntactic ciphertext check.
    ///
    /// True when `text` is valid base64 and re-encoding the decoded bytes
    /// yields `text` again. Plaintext that happens to be canonical base64 (for
    /// example "abcd") is reported as ciphertext.
    pub fn is_cipher_text(&self, text: &str) -> bool {
        match STANDARD.decode(text) {
            Ok(decoded) => STANDARD.encode(decoded) == text,
            Err(_) => false,
        }
    }

    /// Encrypt a single parameter value.
    ///
    /// Null stays null. Bytes are encrypted as is, everything else through its
    /// text form.
    pub fn encrypt_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Bytes(b) => Ok(Value::String(self.encrypt_bytes(b))),
            other => {
                let text = other
                    .to_text()
                    .ok_or(CryptError::NotText(other.type_name()))?;
                Ok(Value::String(self.encrypt(&text)))
            }
        }
    }
}

impl Default for FieldCipher {
    fn default() -> Self {
        FieldCipher { key: *DEFAULT_KEY }
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}
