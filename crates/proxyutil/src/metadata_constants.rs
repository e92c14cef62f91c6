//! Constants shared between the proxy client and the proxy server.

/// Keys carried in the `extra` map of an open-connection request.
pub const REAL_URL_KEY: &str = "realUrl";
pub const USER_KEY: &str = "user";
pub const PASSWORD_KEY: &str = "pwd";

/// Query parameter keys understood in a proxy URL.
///
/// Note that the password is spelled out in the url, but sent as `pwd` in the
/// open request.
pub const URL_REAL_URL_PARAM: &str = "realUrl";
pub const URL_USER_PARAM: &str = "user";
pub const URL_PASSWORD_PARAM: &str = "password";
pub const URL_DIALECT_PARAM: &str = "dialect";

/// Port the proxy listens on when none is given.
pub const DEFAULT_PROXY_PORT: u16 = 9999;

/// Number of rows returned per batch when a request doesn't ask for a
/// positive fetch size.
pub const DEFAULT_FETCH_SIZE: usize = 100;
