//! TCP listener and connector.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use super::{Acceptor, StreamPair};
use crate::error::Result;

/// Open a TCP stream with Nagle disabled.
pub(crate) async fn connect(addr: &str) -> Result<StreamPair> {
    let stream = TcpStream::connect(addr).await?;
    into_pair(stream)
}

fn into_pair(stream: TcpStream) -> Result<StreamPair> {
    stream.set_nodelay(true)?;
    let remote = stream.peer_addr()?.to_string();
    let (reader, writer) = stream.into_split();
    Ok(StreamPair {
        reader: Box::pin(reader),
        writer: Box::pin(writer),
        remote,
    })
}

/// TCP listener.
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind to `addr`. Port 0 picks an ephemeral port.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> Result<StreamPair> {
        let (stream, _addr) = self.listener.accept().await?;
        into_pair(stream)
    }

    fn local(&self) -> String {
        format!("tcp://{}", self.local_addr)
    }
}
