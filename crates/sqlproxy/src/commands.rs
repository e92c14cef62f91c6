use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use fieldcrypt::FieldCipher;
use proxyclient::{ExecuteResult, ProxyConnection, ProxyTransport};
use proxysrv::config::ServerConfig;
use proxysrv::driver::DriverManager;
use proxysrv::handler::ProxyHandler;
use proxysrv::server::ProxyServer;
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::args::{PingArgs, QueryArgs, ServerArgs};

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server.
    Server(ServerArgs),
    /// Check that a proxy server is reachable.
    Ping(PingArgs),
    /// Run statements through a proxy server and print the results.
    Query(QueryArgs),
}

impl Commands {
    pub fn run(self) -> Result<()> {
        match self {
            Commands::Server(server) => server.run(),
            Commands::Ping(ping) => ping.run(),
            Commands::Query(query) => query.run(),
        }
    }
}

trait RunCommand {
    fn run(self) -> Result<()>;
}

impl RunCommand for ServerArgs {
    fn run(self) -> Result<()> {
        let cipher = match &self.cipher_key {
            Some(key) => FieldCipher::new(key.as_bytes())?,
            None => FieldCipher::default(),
        };
        let config = ServerConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            default_fetch_size: self.fetch_size,
            ..Default::default()
        };

        let runtime = build_runtime("server")?;
        runtime.block_on(async move {
            let listener = TcpListener::bind(&self.bind).await?;
            let addr = listener.local_addr()?;
            info!(%addr, ?config, "starting proxy server");
            println!("Listening on {addr}");
            println!("Connect via: proxy://{addr}?realUrl=<database url>");

            let handler = ProxyHandler::new(config, DriverManager::with_builtin_drivers(), cipher);
            ProxyServer::new(handler).serve(listener).await?;
            Ok(())
        })
    }
}

impl RunCommand for PingArgs {
    fn run(self) -> Result<()> {
        let runtime = build_runtime("ping")?;
        runtime.block_on(async move {
            let transport = ProxyTransport::connect(&self.addr).await?;
            let server_time = transport.ping().await?;
            println!("PONG from {}, server time {server_time}", self.addr);
            Ok(())
        })
    }
}

impl RunCommand for QueryArgs {
    fn run(self) -> Result<()> {
        let runtime = build_runtime("query")?;
        runtime.block_on(async move {
            let conn = ProxyConnection::open(&self.url).await?;
            let result = run_statements(&conn, &self.statements, self.fetch_size).await;
            conn.close().await?;
            result
        })
    }
}

async fn run_statements(conn: &ProxyConnection, statements: &[String], fetch_size: i32) -> Result<()> {
    for sql in statements {
        let mut stmt = conn.prepare_statement(sql)?;
        stmt.set_fetch_size(fetch_size);
        match stmt.execute().await? {
            ExecuteResult::Rows(mut cursor) => {
                println!("{}", cursor.column_names().join("\t"));
                let mut count = 0;
                while cursor.next().await? {
                    let cells = (0..cursor.column_names().len())
                        .map(|idx| cursor.get(idx).map(|v| v.to_string()))
                        .collect::<Result<Vec<_>, _>>()?;
                    println!("{}", cells.join("\t"));
                    count += 1;
                }
                println!("({count} rows)");
                cursor.close().await?;
            }
            ExecuteResult::Updated(count) => println!("UPDATE {count}"),
        }
        stmt.close().await?;
    }
    Ok(())
}

fn build_runtime(thread_label: &'static str) -> Result<Runtime> {
    let runtime = Builder::new_multi_thread()
        .thread_name_fn(move || {
            static THREAD_ID: AtomicU64 = AtomicU64::new(0);
            let id = THREAD_ID.fetch_add(1, Ordering::Relaxed);
            format!("{thread_label}-thread-{id}")
        })
        .enable_all()
        .build()?;

    Ok(runtime)
}
