use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use proxyproto::ids::ResultSetId;
use proxyproto::messages::{Request, Response};
use proxyproto::value::{Value, ValueType};
use rust_decimal::Decimal;
use tracing::trace;

use crate::connection::ConnShared;
use crate::errors::{ClientError, Result};

/// Forward only cursor over rows produced by a query.
///
/// Rows arrive in batches. Advancing past the end of a batch fetches the
/// next one if the server reported more rows.
pub struct ProxyCursor {
    conn: Arc<ConnShared>,
    result_set_id: Option<ResultSetId>,
    columns: Vec<String>,
    /// Lowercased column name to index, first occurrence wins.
    column_lookup: HashMap<String, usize>,
    batch: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
    has_more_rows: bool,
    fetch_size: i32,
    closed: bool,
}

impl ProxyCursor {
    pub(crate) fn new(conn: Arc<ConnShared>, resp: Response, fetch_size: i32) -> Self {
        let columns = resp.column_names.unwrap_or_default();
        let mut column_lookup = HashMap::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            column_lookup.entry(name.to_lowercase()).or_insert(idx);
        }

        ProxyCursor {
            conn,
            result_set_id: resp.result_set_id,
            columns,
            column_lookup,
            batch: resp.rows.into(),
            current: None,
            has_more_rows: resp.has_more_rows,
            fetch_size,
            closed: false,
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn result_set_id(&self) -> Option<&ResultSetId> {
        self.result_set_id.as_ref()
    }

    /// Advance to the next row. Returns false once every row has been read.
    pub async fn next(&mut self) -> Result<bool> {
        if self.closed {
            return Err(ClientError::CursorClosed);
        }

        if self.batch.is_empty() && self.has_more_rows {
            self.fetch_batch().await?;
        }

        self.current = self.batch.pop_front();
        Ok(self.current.is_some())
    }

    async fn fetch_batch(&mut self) -> Result<()> {
        let rs_id = self
            .result_set_id
            .clone()
            .ok_or(ClientError::MalformedResponse(
                "more rows reported without a result set id",
            ))?;
        self.conn.ensure_open()?;

        let req = Request::fetch_rows(self.conn.id.clone(), rs_id, self.fetch_size);
        let resp = self.conn.transport.request(req).await?;
        trace!(rows = resp.rows.len(), has_more_rows = resp.has_more_rows, "fetched batch");

        self.has_more_rows = resp.has_more_rows;
        self.batch = resp.rows.into();
        Ok(())
    }

    /// Resolve a column name to its 0-based index. Names are matched case
    /// insensitively.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.column_lookup
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| ClientError::ColumnNotFound(name.to_string()))
    }

    /// The raw value of a column in the current row.
    pub fn get(&self, col: impl ColumnIndex) -> Result<&Value> {
        let idx = col.resolve(self)?;
        let row = self.current.as_ref().ok_or(ClientError::NoCurrentRow)?;
        row.get(idx).ok_or(ClientError::ColumnOutOfRange {
            index: idx,
            count: row.len(),
        })
    }

    /// The value of a column converted to the given type.
    pub fn get_as(&self, col: impl ColumnIndex, ty: ValueType) -> Result<Value> {
        Ok(self.get(col)?.cast(ty)?)
    }

    pub fn is_null(&self, col: impl ColumnIndex) -> Result<bool> {
        Ok(self.get(col)?.is_null())
    }

    pub fn get_string(&self, col: impl ColumnIndex) -> Result<Option<String>> {
        match self.get_as(col, ValueType::String)? {
            Value::String(s) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    pub fn get_i64(&self, col: impl ColumnIndex) -> Result<Option<i64>> {
        match self.get_as(col, ValueType::Int)? {
            Value::Int(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn get_f64(&self, col: impl ColumnIndex) -> Result<Option<f64>> {
        match self.get_as(col, ValueType::Float)? {
            Value::Float(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn get_bool(&self, col: impl ColumnIndex) -> Result<Option<bool>> {
        match self.get_as(col, ValueType::Bool)? {
            Value::Bool(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn get_decimal(&self, col: impl ColumnIndex) -> Result<Option<Decimal>> {
        match self.get_as(col, ValueType::Decimal)? {
            Value::Decimal(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn get_bytes(&self, col: impl ColumnIndex) -> Result<Option<Vec<u8>>> {
        match self.get_as(col, ValueType::Bytes)? {
            Value::Bytes(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn get_date(&self, col: impl ColumnIndex) -> Result<Option<NaiveDate>> {
        match self.get_as(col, ValueType::Date)? {
            Value::Date(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn get_time(&self, col: impl ColumnIndex) -> Result<Option<NaiveTime>> {
        match self.get_as(col, ValueType::Time)? {
            Value::Time(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn get_timestamp(&self, col: impl ColumnIndex) -> Result<Option<NaiveDateTime>> {
        match self.get_as(col, ValueType::Timestamp)? {
            Value::Timestamp(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.conn.is_closed()
    }

    /// Close the cursor on the server.
    ///
    /// Nothing is sent if the owning connection is already closed.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.batch.clear();
        self.current = None;

        if self.conn.is_closed() {
            return Ok(());
        }
        if let Some(rs_id) = self.result_set_id.clone() {
            self.conn
                .transport
                .request(Request::close_result_set(self.conn.id.clone(), rs_id))
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProxyCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCursor")
            .field("result_set_id", &self.result_set_id)
            .field("columns", &self.columns)
            .field("buffered", &self.batch.len())
            .field("has_more_rows", &self.has_more_rows)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Something that identifies a column in a cursor.
pub trait ColumnIndex {
    /// Resolve to a 0-based column index.
    fn resolve(&self, cursor: &ProxyCursor) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, cursor: &ProxyCursor) -> Result<usize> {
        let count = cursor.columns.len();
        if *self >= count {
            return Err(ClientError::ColumnOutOfRange {
                index: *self,
                count,
            });
        }
        Ok(*self)
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, cursor: &ProxyCursor) -> Result<usize> {
        cursor.column_index(self)
    }
}
