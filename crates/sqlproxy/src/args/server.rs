use clap::Args;
use proxyutil::metadata_constants::{DEFAULT_FETCH_SIZE, DEFAULT_PROXY_PORT};

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// TCP address to listen on.
    #[arg(
        short = 'b',
        long = "bind",
        env = "SQLPROXY_BIND",
        default_value_t = format!("0.0.0.0:{DEFAULT_PROXY_PORT}")
    )]
    pub bind: String,

    /// Seconds a connection may sit idle before requests against it are
    /// rejected.
    #[arg(long, env = "SQLPROXY_IDLE_TIMEOUT_SECS", default_value_t = 300)]
    pub idle_timeout_secs: u64,

    /// Seconds between sweeps for closed resources.
    #[arg(long, env = "SQLPROXY_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Rows per batch when a client doesn't ask for a positive fetch size.
    #[arg(long, env = "SQLPROXY_FETCH_SIZE", default_value_t = DEFAULT_FETCH_SIZE)]
    pub fetch_size: usize,

    /// 16 byte key used to encrypt field values.
    ///
    /// Defaults to the built in key.
    #[arg(long, env = "SQLPROXY_CIPHER_KEY", hide_env_values = true)]
    pub cipher_key: Option<String>,
}
