use clap::Args;
use proxyutil::metadata_constants::DEFAULT_PROXY_PORT;

#[derive(Debug, Args)]
pub struct PingArgs {
    /// Address of the proxy server.
    #[arg(default_value_t = format!("127.0.0.1:{DEFAULT_PROXY_PORT}"))]
    pub addr: String,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Proxy url, e.g. `proxy://localhost:9999?realUrl=sqlite::memory:`.
    pub url: String,

    /// Rows fetched per batch.
    #[arg(long, default_value_t = 0)]
    pub fetch_size: i32,

    /// Statements to run in order.
    #[arg(trailing_var_arg = true, required = true)]
    pub statements: Vec<String>,
}
