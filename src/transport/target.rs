//! Endpoint addresses.
//!
//! Accepted forms:
//! - `tcp://host:port` or plain `host:port`
//! - `pipe://name` (platform pipe namespace) or `pipe:///abs/path.sock`

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use super::pipe::{self, pipe_path, PipeListener};
use super::tcp::{self, TcpAcceptor};
use super::{Acceptor, Connector, StreamPair};
use crate::error::{Result, WireError};

/// A parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// TCP `host:port` (host may be a name, an IPv4 or a bracketed IPv6).
    Tcp(String),
    /// Unix socket path or Windows pipe name, already resolved.
    Pipe(String),
}

impl Target {
    /// Parse an address string.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidTarget`] for a missing host, a missing or
    /// non-numeric port, port 0, or an empty pipe name.
    ///
    /// # Example
    ///
    /// ```
    /// use duplexwire::transport::Target;
    ///
    /// let target = Target::parse("tcp://127.0.0.1:9000").unwrap();
    /// assert_eq!(target, Target::Tcp("127.0.0.1:9000".to_string()));
    /// assert!(Target::parse("127.0.0.1:0").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(name) = input.strip_prefix("pipe://") {
            if name.is_empty() {
                return Err(WireError::InvalidTarget("empty pipe name".to_string()));
            }
            return Ok(Target::Pipe(pipe_path(name)));
        }

        let addr = input.strip_prefix("tcp://").unwrap_or(input);
        let Some((host, port)) = addr.rsplit_once(':') else {
            return Err(WireError::InvalidTarget(format!("missing port in '{}'", input)));
        };
        if host.is_empty() {
            return Err(WireError::InvalidTarget(format!("missing host in '{}'", input)));
        }
        match port.parse::<u16>() {
            Ok(0) | Err(_) => Err(WireError::InvalidTarget(format!(
                "invalid port '{}' in '{}'",
                port, input
            ))),
            Ok(_) => Ok(Target::Tcp(addr.to_string())),
        }
    }

    /// Bind a listener for this endpoint.
    pub async fn bind(&self) -> Result<Box<dyn Acceptor>> {
        match self {
            Target::Tcp(addr) => Ok(Box::new(TcpAcceptor::bind(addr).await?)),
            Target::Pipe(path) => Ok(Box::new(PipeListener::bind(path).await?)),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp(addr) => write!(f, "tcp://{}", addr),
            Target::Pipe(path) => write!(f, "pipe://{}", path),
        }
    }
}

impl FromStr for Target {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        Target::parse(s)
    }
}

#[async_trait]
impl Connector for Target {
    async fn connect(&self) -> Result<StreamPair> {
        match self {
            Target::Tcp(addr) => tcp::connect(addr).await,
            Target::Pipe(path) => pipe::connect(path).await,
        }
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}
