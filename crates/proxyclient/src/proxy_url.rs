//! Proxy connection urls.
//!
//! `proxy://host[:port]?realUrl=<url>&user=<user>&password=<password>&dialect=<dialect>`
//!
//! A `jdbc:` prefix is accepted and ignored.
use std::fmt;
use std::str::FromStr;

use proxyutil::metadata_constants::{
    DEFAULT_PROXY_PORT, URL_DIALECT_PARAM, URL_PASSWORD_PARAM, URL_REAL_URL_PARAM, URL_USER_PARAM,
};
use sqlrewrite::Dialect;
use url::Url;

use crate::errors::{ClientError, Result};

const SCHEME: &str = "proxy";
const JDBC_PREFIX: &str = "jdbc:";

/// Where the proxy lives and what it should connect to.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    pub host: String,
    pub port: u16,
    pub real_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Dialect statements are rewritten to before being sent.
    pub dialect: Option<Dialect>,
}

/// Connection properties supplied alongside a url. Set fields take precedence
/// over the url's query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectProps {
    pub real_url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dialect: Option<Dialect>,
}

impl ProxyUrl {
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_with_props(s, ConnectProps::default())
    }

    pub fn parse_with_props(s: &str, props: ConnectProps) -> Result<Self> {
        let trimmed = s.trim();
        let raw = trimmed.strip_prefix(JDBC_PREFIX).unwrap_or(trimmed);
        let url = Url::parse(raw)?;

        if url.scheme() != SCHEME {
            return Err(ClientError::Url(format!(
                "unsupported scheme '{}', expected '{SCHEME}'",
                url.scheme()
            )));
        }
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(ClientError::Url(format!("missing host in '{raw}'"))),
        };
        let port = url.port().unwrap_or(DEFAULT_PROXY_PORT);

        let mut real_url = None;
        let mut user = None;
        let mut password = None;
        let mut dialect = None;
        for (key, val) in url.query_pairs() {
            match key.as_ref() {
                URL_REAL_URL_PARAM => real_url = Some(val.into_owned()),
                URL_USER_PARAM => user = Some(val.into_owned()),
                URL_PASSWORD_PARAM => password = Some(val.into_owned()),
                URL_DIALECT_PARAM => dialect = Some(val.parse::<Dialect>()?),
                _ => (),
            }
        }

        let real_url = props
            .real_url
            .or(real_url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ClientError::Url(format!("missing '{URL_REAL_URL_PARAM}'")))?;

        Ok(ProxyUrl {
            host,
            port,
            real_url,
            user: props.user.or(user),
            password: props.password.or(password),
            dialect: props.dialect.or(dialect),
        })
    }

    /// Socket address of the proxy server.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyUrl {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ProxyUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyUrl")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("real_url", &self.real_url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dialect", &self.dialect)
            .finish()
    }
}
