use std::time::Duration;

use proxyproto::codec::DEFAULT_MAX_FRAME_SIZE;
use proxyutil::metadata_constants::DEFAULT_FETCH_SIZE;

/// Idle time after which a connection is considered expired.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How often the registry is swept for closed resources.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Rows returned per batch when the request doesn't ask for a positive
    /// fetch size.
    pub default_fetch_size: usize,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            default_fetch_size: DEFAULT_FETCH_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Resolve the batch size for a request.
    pub fn fetch_size(&self, requested: i32) -> usize {
        if requested > 0 {
            requested as usize
        } else {
            self.default_fetch_size
        }
    }
}
