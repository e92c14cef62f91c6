use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_sqlite::ClientBuilder;
use async_trait::async_trait;
use fieldcrypt::FieldCipher;
use proxyclient::ProxyConnection;
use proxyproto::codec::client::FramedClientConn;
use proxyproto::errinfo::ErrorKind;
use proxyproto::ids::{ConnectionId, ResultSetId};
use proxyproto::messages::{MessageKind, Request, Response};
use proxyproto::value::Value;
use proxysrv::config::ServerConfig;
use proxysrv::driver::{Driver, DriverConnection, DriverManager, DriverResult};
use proxysrv::handler::ProxyHandler;
use proxysrv::registry::Registry;
use proxysrv::server::ProxyServer;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<Registry>,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        Self::start_with_drivers(config, DriverManager::with_builtin_drivers()).await
    }

    async fn start_with_drivers(config: ServerConfig, drivers: DriverManager) -> Self {
        logutil::init_test();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = ProxyHandler::new(config, drivers, FieldCipher::default());
        let server = ProxyServer::new(handler);
        let registry = server.handler().registry().clone();

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.serve_with_shutdown(listener, async {
            let _ = rx.await;
        }));

        TestServer {
            addr,
            registry,
            _shutdown: tx,
        }
    }

    fn url(&self, real_url: &str) -> String {
        format!("proxy://{}?realUrl={}", self.addr, real_url)
    }

    async fn raw(&self) -> FramedClientConn<TcpStream> {
        FramedClientConn::new(TcpStream::connect(self.addr).await.unwrap())
    }
}

/// Open a connection over a raw protocol client.
async fn raw_open(conn: &mut FramedClientConn<TcpStream>, real_url: &str) -> ConnectionId {
    let mut extra = BTreeMap::new();
    extra.insert("realUrl".to_string(), Value::from(real_url));
    let resp = conn
        .roundtrip(Request::open_connection(extra))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    ConnectionId::from(resp.rows[0][0].as_str().unwrap())
}

async fn raw_update(conn: &mut FramedClientConn<TcpStream>, id: &ConnectionId, sql: &str) {
    conn.roundtrip(Request::execute_update(id.clone(), sql, BTreeMap::new()))
        .await
        .unwrap()
        .into_result()
        .unwrap();
}

fn expect_error(resp: Response) -> proxyproto::errinfo::ErrorInfo {
    assert_eq!(MessageKind::Exception, resp.kind);
    resp.into_result().unwrap_err()
}

/// Poll until `cond` holds, panicking after a couple seconds.
async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn db_url(dir: &TempDir) -> String {
    format!("sqlite:{}", dir.path().join("proxy.db").display())
}

async fn raw_column(dir: &TempDir, sql: &'static str) -> Vec<Option<String>> {
    let client = ClientBuilder::new()
        .path(dir.path().join("proxy.db"))
        .open()
        .await
        .unwrap();
    client
        .conn(move |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, Option<String>>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn query_rows_arrive_in_batches() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut conn = server.raw().await;
    let id = raw_open(&mut conn, "sqlite::memory:").await;

    raw_update(&mut conn, &id, "CREATE TABLE t (n INTEGER)").await;
    raw_update(&mut conn, &id, "INSERT INTO t VALUES (1), (2), (3), (4), (5)").await;

    let resp = conn
        .roundtrip(Request::execute_query(
            id.clone(),
            "SELECT n FROM t ORDER BY n",
            BTreeMap::new(),
            2,
        ))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(vec![vec![Value::Int(1)], vec![Value::Int(2)]], resp.rows);
    assert!(resp.has_more_rows);
    assert_eq!(Some(vec!["n".to_string()]), resp.column_names);
    let stmt_id = resp.statement_id.unwrap();
    let rs_id = resp.result_set_id.unwrap();
    assert!(stmt_id.is_owned_by(id.as_str()));
    assert!(rs_id.is_owned_by(stmt_id.as_str()));

    let resp = conn
        .roundtrip(Request::fetch_rows(id.clone(), rs_id.clone(), 10))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(3, resp.rows.len());
    assert_eq!(vec![Value::Int(5)], resp.rows[2]);
    assert!(!resp.has_more_rows);

    // Zero fetch size falls back to the default.
    let resp = conn
        .roundtrip(Request::fetch_rows(id.clone(), rs_id, 0))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert!(resp.rows.is_empty());
    assert!(!resp.has_more_rows);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_cursor_reads_every_batch() {
    let server = TestServer::start(ServerConfig::default()).await;
    let conn = ProxyConnection::open(&server.url("sqlite::memory:"))
        .await
        .unwrap();

    conn.prepare_statement("CREATE TABLE t (n INTEGER)")
        .unwrap()
        .execute_update()
        .await
        .unwrap();
    let inserted = conn
        .prepare_statement("INSERT INTO t VALUES (1), (2), (3), (4), (5)")
        .unwrap()
        .execute_update()
        .await
        .unwrap();
    assert_eq!(5, inserted);

    let mut stmt = conn.prepare_statement("SELECT n FROM t ORDER BY n").unwrap();
    stmt.set_fetch_size(2);
    let mut cursor = stmt.execute_query().await.unwrap();
    let mut seen = Vec::new();
    while cursor.next().await.unwrap() {
        seen.push(cursor.get_i64("n").unwrap().unwrap());
    }
    assert_eq!(vec![1, 2, 3, 4, 5], seen);

    cursor.close().await.unwrap();
    stmt.close().await.unwrap();
    assert_eq!(0, server.registry.num_result_sets());
    assert_eq!(0, server.registry.num_statements());
    conn.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_result_set_is_reported() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut conn = server.raw().await;
    let id = raw_open(&mut conn, "sqlite::memory:").await;

    let missing = ResultSetId::from(format!("{id}_nope_nope"));
    let resp = conn
        .roundtrip(Request::fetch_rows(id.clone(), missing, 10))
        .await
        .unwrap();
    let err = expect_error(resp);
    assert_eq!(ErrorKind::ResultSetNotFound, err.kind());
    assert_eq!(Some("07000"), err.sql_state());

    // Ids outside the connection's namespace are never looked up.
    let foreign = ResultSetId::from("other_stmt_rs");
    let resp = conn
        .roundtrip(Request::fetch_rows(id.clone(), foreign, 10))
        .await
        .unwrap();
    assert_eq!(ErrorKind::ResultSetNotFound, expect_error(resp).kind());

    // Fetch without an id is a protocol error.
    let req = Request {
        connection_id: Some(id.clone()),
        ..Request::new(MessageKind::FetchRows)
    };
    let resp = conn.roundtrip(req).await.unwrap();
    assert_eq!(ErrorKind::Protocol, expect_error(resp).kind());

    // Session still usable.
    let resp = conn.roundtrip(Request::ping()).await.unwrap();
    assert!(resp.timestamp.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn open_errors() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut conn = server.raw().await;

    let resp = conn
        .roundtrip(Request::open_connection(BTreeMap::new()))
        .await
        .unwrap();
    assert_eq!(ErrorKind::Protocol, expect_error(resp).kind());

    let mut extra = BTreeMap::new();
    extra.insert("realUrl".to_string(), Value::from("jdbc:oracle:thin:@db:1521"));
    let resp = conn
        .roundtrip(Request::open_connection(extra))
        .await
        .unwrap();
    let err = expect_error(resp);
    assert_eq!(ErrorKind::Database, err.kind());
    assert_eq!(Some("08001"), err.sql_state());

    let resp = conn
        .roundtrip(Request::execute_update(
            ConnectionId::from("unknown"),
            "SELECT 1",
            BTreeMap::new(),
        ))
        .await
        .unwrap();
    assert_eq!(ErrorKind::ConnectionNotFound, expect_error(resp).kind());
}

#[tokio::test(flavor = "multi_thread")]
async fn values_stored_encrypted_and_read_back_plain() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(ServerConfig::default()).await;
    let conn = ProxyConnection::open(&server.url(&db_url(&dir)))
        .await
        .unwrap();

    conn.prepare_statement("CREATE TABLE t (col TEXT)")
        .unwrap()
        .execute_update()
        .await
        .unwrap();

    let mut insert = conn.prepare_statement("INSERT INTO t(col) VALUES (?)").unwrap();
    insert.set(1, "hello").unwrap();
    assert_eq!(1, insert.execute_update().await.unwrap());

    let cipher = FieldCipher::default();
    let stored = raw_column(&dir, "SELECT col FROM t").await;
    assert_eq!(vec![Some(cipher.encrypt("hello"))], stored);

    let mut select = conn
        .prepare_statement("SELECT col FROM t WHERE col = ?")
        .unwrap();
    select.set(1, "hello").unwrap();
    let mut cursor = select.execute_query().await.unwrap();
    assert!(cursor.next().await.unwrap());
    assert_eq!(Some("hello".to_string()), cursor.get_string("col").unwrap());
    assert!(!cursor.next().await.unwrap());

    conn.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn update_leaves_second_parameter_plain() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(ServerConfig::default()).await;
    let conn = ProxyConnection::open(&server.url(&db_url(&dir)))
        .await
        .unwrap();

    conn.prepare_statement("CREATE TABLE t (a TEXT, b TEXT, c TEXT)")
        .unwrap()
        .execute_update()
        .await
        .unwrap();

    let mut insert = conn
        .prepare_statement("INSERT INTO t (a, b, c) VALUES (?, ?, ?)")
        .unwrap();
    for (pos, v) in [(1, "x"), (2, "y"), (3, "z")] {
        insert.set(pos, v).unwrap();
    }
    insert.execute_update().await.unwrap();

    let mut update = conn
        .prepare_statement("UPDATE t SET a = ?, b = ? WHERE c = ?")
        .unwrap();
    update.set(1, "a1").unwrap();
    update.set(2, "b1").unwrap();
    update.set(3, "z").unwrap();
    assert_eq!(1, update.execute_update().await.unwrap());

    let cipher = FieldCipher::default();
    assert_eq!(
        vec![Some(cipher.encrypt("a1"))],
        raw_column(&dir, "SELECT a FROM t").await
    );
    assert_eq!(
        vec![Some("b1".to_string())],
        raw_column(&dir, "SELECT b FROM t").await
    );

    // Delete parameters are always encrypted.
    let mut delete = conn.prepare_statement("DELETE FROM t WHERE a = ?").unwrap();
    delete.set(1, "a1").unwrap();
    assert_eq!(1, delete.execute_update().await.unwrap());

    conn.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn close_connection_releases_everything() {
    let server = TestServer::start(ServerConfig::default()).await;
    let conn = ProxyConnection::open(&server.url("sqlite::memory:"))
        .await
        .unwrap();

    let mut stmt = conn.prepare_statement("SELECT 1 AS one").unwrap();
    let _cursor = stmt.execute_query().await.unwrap();
    assert_eq!(1, server.registry.num_connections());
    assert_eq!(1, server.registry.num_statements());
    assert_eq!(1, server.registry.num_result_sets());

    conn.close().await.unwrap();
    assert_eq!(0, server.registry.num_connections());
    assert_eq!(0, server.registry.num_statements());
    assert_eq!(0, server.registry.num_result_sets());
}

#[tokio::test(flavor = "multi_thread")]
async fn updates_do_not_leave_statements_behind() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut conn = server.raw().await;
    let id = raw_open(&mut conn, "sqlite::memory:").await;

    let resp = conn
        .roundtrip(Request::execute_update(
            id.clone(),
            "CREATE TABLE t (a TEXT)",
            BTreeMap::new(),
        ))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert!(resp.statement_id.is_some());
    assert_eq!(0, server.registry.num_statements());

    // Closing an already released statement is acknowledged.
    let resp = conn
        .roundtrip(Request::close_statement(id, resp.statement_id.unwrap()))
        .await
        .unwrap();
    assert_eq!(MessageKind::CloseStatement, resp.kind);
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_connection_expires() {
    let config = ServerConfig {
        idle_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let server = TestServer::start(config).await;
    let conn = ProxyConnection::open(&server.url("sqlite::memory:"))
        .await
        .unwrap();

    conn.prepare_statement("SELECT 1")
        .unwrap()
        .execute_query()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    let err = conn
        .prepare_statement("CREATE TABLE t (a TEXT)")
        .unwrap()
        .execute_update()
        .await
        .unwrap_err();
    assert_eq!(Some(ErrorKind::ConnectionExpired), err.kind());
    assert_eq!(Some("08006"), err.sql_state());
    // Nothing was run against the database.
    assert_eq!(1, server.registry.num_statements());

    // Closing an expired connection still succeeds for the client.
    conn.close().await.unwrap();
    assert!(conn.is_closed());

    // Server reclaims it once the client goes away.
    drop(conn);
    let registry = server.registry.clone();
    eventually(move || registry.num_connections() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_releases_owned_connections() {
    let server = TestServer::start(ServerConfig::default()).await;
    {
        let conn = ProxyConnection::open(&server.url("sqlite::memory:"))
            .await
            .unwrap();
        let mut stmt = conn.prepare_statement("SELECT 1").unwrap();
        let _cursor = stmt.execute_query().await.unwrap();
        assert_eq!(1, server.registry.num_connections());
    }

    let registry = server.registry.clone();
    eventually(move || {
        registry.num_connections() == 0
            && registry.num_statements() == 0
            && registry.num_result_sets() == 0
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_without_connection() {
    let server = TestServer::start(ServerConfig::default()).await;
    let transport = proxyclient::ProxyTransport::connect(server.addr)
        .await
        .unwrap();
    let before = chrono::Utc::now().timestamp_millis();
    let ts = transport.ping().await.unwrap();
    assert!(ts.timestamp_millis() >= before - 1000);
}

#[tokio::test(flavor = "multi_thread")]
async fn unbounded_query_streams_first_batch() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut conn = server.raw().await;
    let id = raw_open(&mut conn, "sqlite::memory:").await;
    raw_update(&mut conn, &id, "CREATE TABLE t (n INTEGER)").await;

    tokio::time::timeout(Duration::from_secs(5), async {
        let resp = conn
            .roundtrip(Request::execute_query(
                id.clone(),
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT x FROM c",
                BTreeMap::new(),
                2,
            ))
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(vec![vec![Value::Int(1)], vec![Value::Int(2)]], resp.rows);
        assert!(resp.has_more_rows);
        let rs_id = resp.result_set_id.unwrap();

        let resp = conn
            .roundtrip(Request::fetch_rows(id.clone(), rs_id.clone(), 3))
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(
            vec![vec![Value::Int(3)], vec![Value::Int(4)], vec![Value::Int(5)]],
            resp.rows
        );
        assert!(resp.has_more_rows);

        // The same connection keeps working while and after the cursor is open.
        raw_update(&mut conn, &id, "INSERT INTO t VALUES (1)").await;

        let resp = conn
            .roundtrip(Request::close_result_set(id.clone(), rs_id))
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(MessageKind::CloseResultSet, resp.kind);

        raw_update(&mut conn, &id, "INSERT INTO t VALUES (2)").await;
    })
    .await
    .expect("unbounded query should stream");

    let registry = server.registry.clone();
    eventually(move || registry.num_result_sets() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn late_row_error_surfaces_on_fetch() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut conn = server.raw().await;
    let id = raw_open(&mut conn, "sqlite::memory:").await;

    let sql = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 20) \
               SELECT CASE WHEN x = 10 THEN abs(-9223372036854775807 - 1) ELSE x END FROM c";
    let resp = conn
        .roundtrip(Request::execute_query(id.clone(), sql, BTreeMap::new(), 2))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(vec![vec![Value::Int(1)], vec![Value::Int(2)]], resp.rows);
    assert!(resp.has_more_rows);
    let rs_id = resp.result_set_id.unwrap();

    let resp = conn
        .roundtrip(Request::fetch_rows(id.clone(), rs_id, 20))
        .await
        .unwrap();
    let err = expect_error(resp);
    assert_eq!(ErrorKind::Database, err.kind());
    assert!(err.message().contains("integer overflow"), "{}", err.message());

    let resp = conn.roundtrip(Request::ping()).await.unwrap();
    assert_eq!(MessageKind::Ping, resp.kind);
}

/// Driver whose connect panics, for urls starting with `panic:`.
struct PanickingDriver;

#[async_trait]
impl Driver for PanickingDriver {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with("panic:")
    }

    async fn connect(
        &self,
        url: &str,
        _user: Option<&str>,
        _password: Option<&str>,
    ) -> DriverResult<Box<dyn DriverConnection>> {
        panic!("driver blew up on {url}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_panic_reported_as_internal_error() {
    let mut drivers = DriverManager::with_builtin_drivers();
    drivers.register(Arc::new(PanickingDriver));
    let server = TestServer::start_with_drivers(ServerConfig::default(), drivers).await;
    let mut conn = server.raw().await;

    let mut extra = BTreeMap::new();
    extra.insert("realUrl".to_string(), Value::from("panic:now"));
    let resp = conn
        .roundtrip(Request::open_connection(extra))
        .await
        .unwrap();
    let err = expect_error(resp);
    assert_eq!(ErrorKind::Internal, err.kind());
    assert!(err.message().contains("driver blew up on panic:now"), "{}", err.message());

    // Session survives the panic.
    let resp = conn.roundtrip(Request::ping()).await.unwrap();
    assert_eq!(MessageKind::Ping, resp.kind);
    let id = raw_open(&mut conn, "sqlite::memory:").await;
    raw_update(&mut conn, &id, "CREATE TABLE t (n INTEGER)").await;
    assert_eq!(1, server.registry.num_connections());
}
