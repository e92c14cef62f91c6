use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use proxyclient::errors::ClientError;
use proxyclient::{ExecuteResult, ProxyConnection};
use proxyproto::codec::server::FramedConn;
use proxyproto::errinfo::{ErrorInfo, ErrorKind};
use proxyproto::ids::{ResultSetId, StatementId};
use proxyproto::messages::{MessageKind, Request, Response};
use proxyproto::value::Value;
use tokio::net::TcpListener;

type Log = Arc<Mutex<Vec<Request>>>;

/// Start a single client server answering with `respond`. Every request it
/// sees is recorded.
async fn fake_server<F>(respond: F) -> (SocketAddr, Log)
where
    F: Fn(&Request) -> Response + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Log = Arc::default();

    let server_log = log.clone();
    tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        let mut conn = FramedConn::new(sock);
        while let Ok(Some(req)) = conn.read().await {
            let resp = match req.kind {
                MessageKind::OpenConnection => Response {
                    rows: vec![vec![Value::from("c1")]],
                    ..Response::ack(MessageKind::OpenConnection)
                },
                _ => respond(&req),
            };
            server_log.lock().unwrap().push(req);
            if conn.send(resp).await.is_err() {
                return;
            }
        }
    });

    (addr, log)
}

fn kinds(log: &Log) -> Vec<MessageKind> {
    log.lock().unwrap().iter().map(|r| r.kind).collect()
}

fn url(addr: SocketAddr) -> String {
    format!("proxy://{addr}?realUrl=sqlite::memory:&user=u&password=p")
}

#[tokio::test]
async fn open_sends_real_url_and_credentials() {
    let (addr, log) = fake_server(|req| Response::ack(req.kind)).await;
    let conn = ProxyConnection::open(&url(addr)).await.unwrap();
    assert_eq!("c1", conn.id().as_str());

    let open = log.lock().unwrap()[0].clone();
    assert_eq!(Some("sqlite::memory:".to_string()), open.extra_str("realUrl"));
    assert_eq!(Some("u".to_string()), open.extra_str("user"));
    assert_eq!(Some("p".to_string()), open.extra_str("pwd"));
}

#[tokio::test]
async fn cursor_fetches_next_batch_once() {
    let (addr, log) = fake_server(|req| match req.kind {
        MessageKind::ExecuteQuery => Response {
            rows: vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(2), Value::from("b")],
            ],
            column_names: Some(vec!["id".to_string(), "Name".to_string()]),
            has_more_rows: true,
            statement_id: Some(StatementId::from("c1_s")),
            result_set_id: Some(ResultSetId::from("c1_s_r")),
            ..Response::ack(MessageKind::ExecuteQuery)
        },
        MessageKind::FetchRows => Response {
            rows: vec![vec![Value::Int(3), Value::Null]],
            has_more_rows: false,
            result_set_id: req.result_set_id.clone(),
            ..Response::ack(MessageKind::FetchRows)
        },
        kind => Response::ack(kind),
    })
    .await;

    let conn = ProxyConnection::open(&url(addr)).await.unwrap();
    let mut stmt = conn.prepare_statement("SELECT id, name FROM t").unwrap();
    stmt.set_fetch_size(2);
    let mut cursor = stmt.execute_query().await.unwrap();

    let mut ids = Vec::new();
    let mut names = Vec::new();
    while cursor.next().await.unwrap() {
        ids.push(cursor.get_i64(0).unwrap().unwrap());
        names.push(cursor.get_string("NAME").unwrap());
    }
    assert_eq!(vec![1, 2, 3], ids);
    assert_eq!(
        vec![Some("a".to_string()), Some("b".to_string()), None],
        names
    );
    assert!(!cursor.next().await.unwrap());

    assert_eq!(
        vec![
            MessageKind::OpenConnection,
            MessageKind::ExecuteQuery,
            MessageKind::FetchRows
        ],
        kinds(&log)
    );
    let fetch = log.lock().unwrap()[2].clone();
    assert_eq!(Some(ResultSetId::from("c1_s_r")), fetch.result_set_id);
    assert_eq!(2, fetch.fetch_size);

    assert!(matches!(
        cursor.get_string("missing"),
        Err(ClientError::ColumnNotFound(_))
    ));
}

#[tokio::test]
async fn server_errors_keep_state_and_code() {
    let (addr, _log) = fake_server(|_| {
        Response::exception(
            ErrorInfo::new(ErrorKind::Database, "no such table: t")
                .with_sql_state("HY000")
                .with_error_code(1),
        )
    })
    .await;

    let conn = ProxyConnection::open(&url(addr)).await.unwrap();
    let mut stmt = conn.prepare_statement("DELETE FROM t").unwrap();
    let err = stmt.execute_update().await.unwrap_err();
    assert_eq!(Some(ErrorKind::Database), err.kind());
    assert_eq!(Some("HY000"), err.sql_state());
    assert_eq!(Some(1), err.error_code());

    // Session stays usable after an error.
    let err = stmt.execute_update().await.unwrap_err();
    assert_eq!(Some(ErrorKind::Database), err.kind());
}

#[tokio::test]
async fn execute_picks_request_kind() {
    let (addr, log) = fake_server(|req| match req.kind {
        MessageKind::ExecuteUpdate => Response {
            update_count: 3,
            ..Response::ack(MessageKind::ExecuteUpdate)
        },
        MessageKind::ExecuteQuery => Response {
            column_names: Some(vec!["x".to_string()]),
            ..Response::ack(MessageKind::ExecuteQuery)
        },
        kind => Response::ack(kind),
    })
    .await;

    let conn = ProxyConnection::open(&url(addr)).await.unwrap();

    let mut stmt = conn.prepare_statement("update t set a = ?").unwrap();
    stmt.set(1, "v").unwrap();
    assert!(matches!(
        stmt.execute().await.unwrap(),
        ExecuteResult::Updated(3)
    ));

    let mut stmt = conn.prepare_statement("select x from t").unwrap();
    match stmt.execute().await.unwrap() {
        ExecuteResult::Rows(mut cursor) => assert!(!cursor.next().await.unwrap()),
        other => panic!("unexpected result: {other:?}"),
    }

    let sent = log.lock().unwrap()[1].clone();
    assert_eq!(Some(&Value::from("v")), sent.params.get(&1));
    assert_eq!(
        vec![
            MessageKind::OpenConnection,
            MessageKind::ExecuteUpdate,
            MessageKind::ExecuteQuery
        ],
        kinds(&log)
    );
}

#[tokio::test]
async fn closing_after_connection_close_sends_nothing() {
    let (addr, log) = fake_server(|req| match req.kind {
        MessageKind::ExecuteQuery => Response {
            column_names: Some(vec!["x".to_string()]),
            statement_id: Some(StatementId::from("c1_s")),
            result_set_id: Some(ResultSetId::from("c1_s_r")),
            ..Response::ack(MessageKind::ExecuteQuery)
        },
        kind => Response::ack(kind),
    })
    .await;

    let conn = ProxyConnection::open(&url(addr)).await.unwrap();
    let mut stmt = conn.prepare_statement("select x from t").unwrap();
    let mut cursor = stmt.execute_query().await.unwrap();

    conn.close().await.unwrap();
    conn.close().await.unwrap();
    cursor.close().await.unwrap();
    stmt.close().await.unwrap();

    assert_eq!(
        vec![
            MessageKind::OpenConnection,
            MessageKind::ExecuteQuery,
            MessageKind::CloseConnection
        ],
        kinds(&log)
    );
    assert!(matches!(
        conn.prepare_statement("select 1"),
        Err(ClientError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn expired_connection_close_counts_as_closed() {
    let (addr, _log) = fake_server(|req| match req.kind {
        MessageKind::CloseConnection => Response::exception(ErrorInfo::new(
            ErrorKind::ConnectionExpired,
            "Connection expired: c1",
        )),
        kind => Response::ack(kind),
    })
    .await;

    let conn = ProxyConnection::open(&url(addr)).await.unwrap();
    conn.close().await.unwrap();
    assert!(conn.is_closed());
}

#[tokio::test]
async fn statements_rewritten_for_dialect() {
    let (addr, log) = fake_server(|req| Response::ack(req.kind)).await;
    let conn = ProxyConnection::open(&format!(
        "jdbc:proxy://{addr}?realUrl=sqlite::memory:&dialect=Snowflake"
    ))
    .await
    .unwrap();

    let mut stmt = conn.prepare_statement("insert into `t` values (?)").unwrap();
    assert_eq!("insert into \"t\" values (?)", stmt.sql());
    stmt.set(1, 1_i64).unwrap();
    stmt.execute_update().await.unwrap();

    let sent = log.lock().unwrap()[1].clone();
    assert_eq!(Some("insert into \"t\" values (?)".to_string()), sent.sql);
}

#[tokio::test]
async fn ping_returns_server_time() {
    let (addr, _log) = fake_server(|req| Response {
        timestamp: Some(1_700_000_000_000),
        ..Response::ack(req.kind)
    })
    .await;

    let conn = ProxyConnection::open(&url(addr)).await.unwrap();
    let ts = conn.ping().await.unwrap();
    assert_eq!(1_700_000_000_000, ts.timestamp_millis());
}
