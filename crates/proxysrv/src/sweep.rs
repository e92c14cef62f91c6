use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::Registry;

/// Background task that periodically drops closed handles from the registry.
#[derive(Debug)]
pub struct SweepJob {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SweepJob {
    /// Spawn the sweeper. The first sweep happens one interval after start.
    pub fn spawn(registry: Arc<Registry>, interval: Duration) -> Self {
        let (tx, mut rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Interval ticks immediately on first call.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut rx => {
                        debug!("exiting registry sweeper");
                        return;
                    }
                    _ = ticker.tick() => {
                        let stats = registry.sweep().await;
                        if !stats.is_empty() {
                            info!(
                                connections = stats.connections,
                                statements = stats.statements,
                                result_sets = stats.result_sets,
                                "swept closed resources"
                            );
                        }
                    }
                }
            }
        });

        SweepJob {
            shutdown: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the sweeper and wait for it to exit.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
