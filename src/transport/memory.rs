//! In-process transport over `tokio::io::duplex`.
//!
//! Useful for tests and for wiring two endpoints inside one process without
//! touching the OS network stack.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{Acceptor, Connector, StreamPair};
use crate::error::{Result, WireError};

const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Create a connected connector/acceptor pair.
///
/// `label` shows up as the remote endpoint on both sides.
pub fn memory_channel(label: impl Into<String>) -> (MemoryConnector, MemoryAcceptor) {
    let label = label.into();
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            label: label.clone(),
            tx,
            capacity: DEFAULT_PIPE_CAPACITY,
        },
        MemoryAcceptor {
            label,
            rx: Mutex::new(rx),
        },
    )
}

/// Client side of an in-process channel. Cloneable; every `connect` creates a
/// fresh duplex stream.
#[derive(Clone)]
pub struct MemoryConnector {
    label: String,
    tx: mpsc::UnboundedSender<StreamPair>,
    capacity: usize,
}

impl MemoryConnector {
    /// Set the in-flight byte capacity of each created stream.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<StreamPair> {
        let (near, far) = tokio::io::duplex(self.capacity);
        self.tx
            .send(StreamPair::from_stream(far, self.label.clone()))
            .map_err(|_| WireError::Io(std::io::ErrorKind::ConnectionRefused.into()))?;
        Ok(StreamPair::from_stream(near, self.label.clone()))
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.label)
    }
}

/// Server side of an in-process channel.
pub struct MemoryAcceptor {
    label: String,
    rx: Mutex<mpsc::UnboundedReceiver<StreamPair>>,
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    async fn accept(&self) -> Result<StreamPair> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(WireError::ConnectionClosed)
    }

    fn local(&self) -> String {
        format!("memory://{}", self.label)
    }
}
