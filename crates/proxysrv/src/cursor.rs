use std::sync::Arc;

use fieldcrypt::FieldCipher;
use fieldcrypt::reveal::reveal_row;
use proxyproto::value::Value;

use crate::driver::{DriverCursor, DriverResult};

/// A driver cursor whose cells are decrypted as they're read, fetched in
/// batches.
///
/// Keeps one row of lookahead so a batch knows whether more rows follow.
pub struct DecryptingCursor {
    inner: Box<dyn DriverCursor>,
    cipher: Arc<FieldCipher>,
    pending: Option<Vec<Value>>,
    exhausted: bool,
}

impl DecryptingCursor {
    pub fn new(inner: Box<dyn DriverCursor>, cipher: Arc<FieldCipher>) -> Self {
        DecryptingCursor {
            inner,
            cipher,
            pending: None,
            exhausted: false,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.inner.columns().iter().map(|c| c.name.clone()).collect()
    }

    /// Fetch up to `n` rows. Returns the rows and whether more remain.
    pub async fn fetch(&mut self, n: usize) -> DriverResult<(Vec<Vec<Value>>, bool)> {
        let mut rows = Vec::with_capacity(n.min(1024));
        while rows.len() < n {
            match self.advance().await? {
                Some(row) => rows.push(reveal_row(&self.cipher, row)),
                None => break,
            }
        }

        if !self.exhausted && self.pending.is_none() {
            self.pending = self.advance().await?;
        }

        Ok((rows, self.pending.is_some()))
    }

    async fn advance(&mut self) -> DriverResult<Option<Vec<Value>>> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        if self.exhausted {
            return Ok(None);
        }
        let row = self.inner.next().await?;
        if row.is_none() {
            self.exhausted = true;
        }
        Ok(row)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub async fn close(&mut self) -> DriverResult<()> {
        self.pending = None;
        self.inner.close().await
    }
}
