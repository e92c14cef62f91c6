//! SQLite driver built on `async-sqlite`.
//!
//! Accepted urls: `sqlite::memory:`, `sqlite:<path>`, `sqlite://<path>`, and
//! any of those prefixed with `jdbc:`.
//!
//! Each query streams its rows from a dedicated reader connection to the same
//! database, so an open cursor never holds up other statements on its
//! connection. In-memory databases are opened as named shared-cache databases
//! for that reason, and file databases use WAL.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_sqlite::rusqlite::types::{Value as SqlValue, ValueRef};
use async_sqlite::rusqlite::{self, ErrorCode, InterruptHandle};
use async_sqlite::{Client, ClientBuilder, JournalMode};
use async_trait::async_trait;
use proxyproto::value::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{
    ColumnMeta, Driver, DriverConnection, DriverCursor, DriverError, DriverResult,
    DriverStatement, PrepareOptions,
};

const MEMORY: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
}

fn parse_url(url: &str) -> Option<Target> {
    let rest = url.strip_prefix("jdbc:").unwrap_or(url);
    let rest = rest.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    match rest {
        "" | MEMORY => Some(Target::Memory),
        path => Some(Target::File(PathBuf::from(path))),
    }
}

impl From<async_sqlite::Error> for DriverError {
    fn from(e: async_sqlite::Error) -> Self {
        match e {
            async_sqlite::Error::Rusqlite(e) => e.into(),
            other => DriverError::new(other.to_string()).with_sql_state("HY000"),
        }
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) => {
                let state = match err.code {
                    ErrorCode::ConstraintViolation => "23000",
                    ErrorCode::CannotOpen => "08001",
                    _ => "HY000",
                };
                DriverError::new(msg.clone().unwrap_or_else(|| err.to_string()))
                    .with_sql_state(state)
                    .with_error_code(err.extended_code)
            }
            other => DriverError::new(other.to_string()).with_sql_state("HY000"),
        }
    }
}

/// Rows a producer may run ahead of the cursor reading them.
const ROW_BUFFER: usize = 64;

/// Location handed to `ClientBuilder::path`, shared by a connection and the
/// readers it opens.
#[derive(Debug, Clone)]
struct Location {
    path: PathBuf,
    shared_memory: bool,
}

impl Location {
    fn for_target(target: &Target) -> Self {
        match target {
            Target::Memory => {
                static MEMORY_DB_ID: AtomicU64 = AtomicU64::new(0);
                let id = MEMORY_DB_ID.fetch_add(1, Ordering::Relaxed);
                Location {
                    path: PathBuf::from(format!(
                        "file:sqlproxy-mem-{}-{id}?mode=memory&cache=shared",
                        std::process::id()
                    )),
                    shared_memory: true,
                }
            }
            Target::File(path) => Location {
                path: path.clone(),
                shared_memory: false,
            },
        }
    }

    async fn open_primary(&self) -> DriverResult<Client> {
        let builder = ClientBuilder::new().path(&self.path);
        let builder = if self.shared_memory {
            builder
        } else {
            builder.journal_mode(JournalMode::Wal)
        };
        Ok(builder.open().await?)
    }

    async fn open_reader(&self) -> DriverResult<Client> {
        let client = ClientBuilder::new().path(&self.path).open().await?;
        if self.shared_memory {
            // Readers skip shared-cache table locks so writers on the primary
            // connection aren't blocked by open cursors.
            client
                .conn(|conn| conn.pragma_update(None, "read_uncommitted", true))
                .await?;
        }
        Ok(client)
    }
}

fn to_sql_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(v as i64),
        Value::Int(v) => SqlValue::Integer(v),
        Value::Float(v) => SqlValue::Real(v),
        Value::Bytes(v) => SqlValue::Blob(v),
        Value::String(v) => SqlValue::Text(v),
        other => match other.to_text() {
            Some(text) => SqlValue::Text(text),
            None => SqlValue::Null,
        },
    }
}

fn from_sql_value(value: ValueRef<'_>, decl_type: Option<&str>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => match decl_type {
            Some(decl) if decl.contains("bool") => Value::Bool(v != 0),
            _ => Value::Int(v),
        },
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(v) => Value::String(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}

impl<'a> From<rusqlite::Column<'a>> for ColumnMeta {
    fn from(col: rusqlite::Column<'a>) -> Self {
        ColumnMeta {
            name: col.name().to_owned(),
            decl_type: col.decl_type().map(|t| t.to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SqliteDriver;

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn accepts(&self, url: &str) -> bool {
        parse_url(url).is_some()
    }

    async fn connect(
        &self,
        url: &str,
        user: Option<&str>,
        _password: Option<&str>,
    ) -> DriverResult<Box<dyn DriverConnection>> {
        let target = parse_url(url)
            .ok_or_else(|| DriverError::new(format!("not a sqlite url: {url}")).with_sql_state("08001"))?;
        if user.is_some() {
            debug!("sqlite ignores connection credentials");
        }

        let location = Location::for_target(&target);
        let client = location.open_primary().await?;
        debug!(?target, "opened sqlite database");

        Ok(Box::new(SqliteConnection {
            client,
            location,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct SqliteConnection {
    client: Client,
    location: Location,
    closed: AtomicBool,
}

fn closed_error(what: &str) -> DriverError {
    DriverError::new(format!("{what} is closed")).with_sql_state("08003")
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    async fn prepare(
        &self,
        sql: &str,
        opts: PrepareOptions,
    ) -> DriverResult<Box<dyn DriverStatement>> {
        if self.is_closed() {
            return Err(closed_error("connection"));
        }
        trace!(%sql, ?opts, "preparing sqlite statement");

        // Prepare once up front to surface syntax errors and learn the
        // placeholder count.
        let check = sql.to_string();
        let parameter_count = self
            .client
            .conn(move |conn| {
                let stmt = conn.prepare(&check)?;
                Ok(stmt.parameter_count())
            })
            .await?;

        Ok(Box::new(SqliteStatement {
            client: self.client.clone(),
            location: self.location.clone(),
            sql: sql.to_string(),
            parameter_count,
            params: BTreeMap::new(),
            closed: false,
        }))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        self.client.close().await?;
        Ok(())
    }
}

pub struct SqliteStatement {
    client: Client,
    location: Location,
    sql: String,
    parameter_count: usize,
    params: BTreeMap<u32, SqlValue>,
    closed: bool,
}

impl SqliteStatement {
    fn check_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(closed_error("statement"));
        }
        Ok(())
    }
}

#[async_trait]
impl DriverStatement for SqliteStatement {
    fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    fn bind(&mut self, position: u32, value: Value) -> DriverResult<()> {
        self.check_open()?;
        if position == 0 || position as usize > self.parameter_count {
            return Err(DriverError::new(format!(
                "parameter index out of range: {position} (statement has {})",
                self.parameter_count
            ))
            .with_sql_state("07009"));
        }
        self.params.insert(position, to_sql_value(value));
        Ok(())
    }

    async fn execute_query(&mut self) -> DriverResult<Box<dyn DriverCursor>> {
        self.check_open()?;
        let sql = self.sql.clone();
        let params = self.params.clone();

        let reader = self.location.open_reader().await?;
        let (header_tx, header_rx) = oneshot::channel();
        let (row_tx, row_rx) = mpsc::channel(ROW_BUFFER);

        let producer = tokio::spawn(async move {
            let result = reader
                .conn(move |conn| {
                    stream_rows(conn, &sql, &params, header_tx, row_tx);
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                debug!(%e, "sqlite row producer failed");
            }
            if let Err(e) = reader.close().await {
                debug!(%e, "error closing sqlite reader");
            }
        });

        let (columns, interrupt) = match header_rx.await {
            Ok(header) => header?,
            Err(_) => {
                return Err(
                    DriverError::new("query ended before reporting its columns")
                        .with_sql_state("HY000"),
                );
            }
        };
        trace!(columns = columns.len(), "streaming sqlite query");

        Ok(Box::new(SqliteCursor {
            columns,
            rows: row_rx,
            interrupt,
            producer: Some(producer),
            closed: false,
        }))
    }

    async fn execute_update(&mut self) -> DriverResult<u64> {
        self.check_open()?;
        let sql = self.sql.clone();
        let params = self.params.clone();

        let affected = self
            .client
            .conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                for (pos, val) in &params {
                    stmt.raw_bind_parameter(*pos as usize, val)?;
                }
                stmt.raw_execute()
            })
            .await?;

        Ok(affected as u64)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        self.params.clear();
        Ok(())
    }
}

type QueryHeader = DriverResult<(Vec<ColumnMeta>, InterruptHandle)>;

fn prepare_bound<'c>(
    conn: &'c rusqlite::Connection,
    sql: &str,
    params: &BTreeMap<u32, SqlValue>,
) -> rusqlite::Result<rusqlite::Statement<'c>> {
    let mut stmt = conn.prepare(sql)?;
    for (pos, val) in params {
        stmt.raw_bind_parameter(*pos as usize, val)?;
    }
    Ok(stmt)
}

/// Run a query on the reader's thread, sending rows as they're stepped.
///
/// Stops after the first failing row, or once the cursor goes away.
fn stream_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &BTreeMap<u32, SqlValue>,
    header: oneshot::Sender<QueryHeader>,
    rows: mpsc::Sender<DriverResult<Vec<Value>>>,
) {
    let mut stmt = match prepare_bound(conn, sql, params) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = header.send(Err(e.into()));
            return;
        }
    };

    let columns = stmt
        .columns()
        .into_iter()
        .map(ColumnMeta::from)
        .collect::<Vec<_>>();
    if header
        .send(Ok((columns.clone(), conn.get_interrupt_handle())))
        .is_err()
    {
        return;
    }

    let mut results = stmt.raw_query();
    loop {
        let row = match results.next() {
            Ok(Some(row)) => columns
                .iter()
                .enumerate()
                .map(|(idx, col)| {
                    row.get_ref(idx)
                        .map(|v| from_sql_value(v, col.decl_type.as_deref()))
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(DriverError::from),
            Ok(None) => return,
            Err(e) => Err(DriverError::from(e)),
        };

        let failed = row.is_err();
        if rows.blocking_send(row).is_err() || failed {
            return;
        }
    }
}

/// Rows pulled from a producer running on a reader connection.
pub struct SqliteCursor {
    columns: Vec<ColumnMeta>,
    rows: mpsc::Receiver<DriverResult<Vec<Value>>>,
    interrupt: InterruptHandle,
    producer: Option<JoinHandle<()>>,
    closed: bool,
}

#[async_trait]
impl DriverCursor for SqliteCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn next(&mut self) -> DriverResult<Option<Vec<Value>>> {
        if self.closed {
            return Err(closed_error("result set"));
        }
        match self.rows.recv().await {
            Some(row) => row.map(Some),
            None => Ok(None),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.rows.close();
        self.interrupt.interrupt();
        if let Some(producer) = self.producer.take() {
            let _ = producer.await;
        }
        Ok(())
    }
}
