//! Proxy endpoint value type.

use std::fmt;
use std::str::FromStr;

use reqwest::Proxy;
use serde::{Deserialize, Serialize};

use crate::{PoolError, Result};

/// Scheme spoken to the proxy itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// HTTP proxy
    #[default]
    Http,
    /// HTTPS proxy
    Https,
}

impl Scheme {
    /// Returns the URL scheme string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One egress point: `scheme://host:port`.
///
/// Endpoints are immutable once built. Two endpoints are equal iff host,
/// port and scheme all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
    scheme: Scheme,
}

impl Endpoint {
    /// Creates an HTTP endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_scheme(host, port, Scheme::Http)
    }

    /// Creates an endpoint with an explicit scheme.
    pub fn with_scheme(host: impl Into<String>, port: u16, scheme: Scheme) -> Self {
        Self {
            host: host.into(),
            port,
            scheme,
        }
    }

    /// Proxy host (IP or domain).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Proxy scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the proxy URL string.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Builds a reqwest proxy routing every request through this endpoint.
    pub fn to_proxy(&self) -> Result<Proxy> {
        Proxy::all(self.url())
            .map_err(|e| PoolError::InvalidEndpoint(format!("{}: {}", self.url(), e)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = PoolError;

    /// Parses `scheme://host:port`, or bare `host:port` as HTTP.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = match s.split_once("://") {
            Some(("http", rest)) => (Scheme::Http, rest),
            Some(("https", rest)) => (Scheme::Https, rest),
            Some((other, _)) => {
                return Err(PoolError::InvalidEndpoint(format!(
                    "unsupported scheme '{}' in '{}'",
                    other, s
                )))
            }
            None => (Scheme::Http, s),
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| PoolError::InvalidEndpoint(format!("missing port in '{}'", s)))?;

        if host.is_empty() {
            return Err(PoolError::InvalidEndpoint(format!("missing host in '{}'", s)));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| PoolError::InvalidEndpoint(format!("bad port in '{}'", s)))?;
        if port == 0 {
            return Err(PoolError::InvalidEndpoint(format!("port 0 in '{}'", s)));
        }

        Ok(Self::with_scheme(host, port, scheme))
    }
}
