//! Transport module - byte-stream endpoints behind two async seams.
//!
//! A [`Connector`] opens one outbound stream; an [`Acceptor`] yields inbound
//! streams. Both hand out a [`StreamPair`] of boxed read/write halves, so the
//! connection layer never sees the concrete socket type.
//!
//! Provided implementations:
//! - TCP ([`Target::Tcp`], [`TcpAcceptor`])
//! - Unix Domain Sockets / Windows Named Pipes ([`Target::Pipe`], [`PipeListener`])
//! - In-process duplex streams ([`memory_channel`])

mod memory;
mod pipe;
mod target;
mod tcp;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

pub use memory::{memory_channel, MemoryAcceptor, MemoryConnector};
pub use pipe::{generate_pipe_path, pipe_path, PipeListener};
pub use target::Target;
pub use tcp::TcpAcceptor;

/// Read half of a connected stream.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Write half of a connected stream.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// A connected byte stream split into halves.
pub struct StreamPair {
    /// Inbound bytes.
    pub reader: BoxedReader,
    /// Outbound bytes.
    pub writer: BoxedWriter,
    /// Human readable remote endpoint (address, path or label).
    pub remote: String,
}

impl StreamPair {
    /// Split any duplex stream into a boxed pair.
    pub fn from_stream<S>(stream: S, remote: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
            remote: remote.into(),
        }
    }
}

impl std::fmt::Debug for StreamPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPair")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Opens outbound streams. Called again for every reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream to the remote endpoint.
    async fn connect(&self) -> Result<StreamPair>;

    /// Endpoint description used in logs.
    fn describe(&self) -> String;
}

/// Yields inbound streams for a server.
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    /// Wait for the next inbound stream.
    async fn accept(&self) -> Result<StreamPair>;

    /// Local endpoint description used in logs.
    fn local(&self) -> String;
}
