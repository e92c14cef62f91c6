use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use proxyproto::errors::ProtoError;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, trace};

use crate::errors::{ProxySrvError, Result};
use crate::handler::ProxyHandler;
use crate::sweep::SweepJob;

/// How often shutdown rechecks for active clients.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct ProxyServer {
    handler: Arc<ProxyHandler>,
}

impl ProxyServer {
    pub fn new(handler: ProxyHandler) -> Self {
        ProxyServer {
            handler: Arc::new(handler),
        }
    }

    pub fn handler(&self) -> &Arc<ProxyHandler> {
        &self.handler
    }

    /// Serve clients from the listener until ctrl-c is received.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, async {
            if let Err(err) = signal::ctrl_c().await {
                error!(%err, "unable to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve clients from the listener until `shutdown` resolves.
    ///
    /// Once triggered, no new clients are accepted and the server waits for
    /// every connected client to disconnect before returning.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let conn_count = Arc::new(AtomicU64::new(0));
        let sweeper = SweepJob::spawn(
            self.handler.registry().clone(),
            self.handler.config().sweep_interval,
        );

        // Shutdown handler.
        let (tx, mut rx) = oneshot::channel();
        let shutdown_conn_count = conn_count.clone();
        tokio::spawn(async move {
            shutdown.await;
            info!("shutdown triggered");
            loop {
                let conn_count = shutdown_conn_count.load(Ordering::Relaxed);
                if conn_count == 0 {
                    let _ = tx.send(());
                    return;
                }
                info!(%conn_count, "shutdown prevented, active connections");
                tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
            }
        });

        let result = loop {
            tokio::select! {
                _ = &mut rx => {
                    info!("shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    let (inbound, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => break Err(ProxySrvError::Io(e)),
                    };
                    conn_count.fetch_add(1, Ordering::Relaxed);

                    let handler = self.handler.clone();
                    let conn_count = conn_count.clone();
                    tokio::spawn(async move {
                        trace!(%peer, "client connected");
                        match handler.handle_connection(inbound).await {
                            Ok(_) => trace!(%peer, "client disconnected from normal closure"),
                            // Peer went away mid frame.
                            Err(ProxySrvError::Proto(ProtoError::Io(e)))
                            | Err(ProxySrvError::Io(e))
                                if e.kind() == io::ErrorKind::UnexpectedEof
                                    || e.kind() == io::ErrorKind::ConnectionReset =>
                            {
                                trace!(%peer, "client disconnected from client-side close")
                            }
                            Err(e) => error!(%e, %peer, "client disconnected with error"),
                        }
                        conn_count.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        };

        sweeper.stop().await;
        result
    }
}
