//! One live connection: send path, shutdown signal and group membership.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use super::FrameSink;
use crate::error::{Result, WireError};
use crate::protocol::{ConnectionId, Frame, FrameBuffer, PacketSplitter};
use crate::transport::{BoxedReader, BoxedWriter};

/// Read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Writer half and its reusable framing buffer.
struct SendState {
    writer: BoxedWriter,
    scratch: BytesMut,
}

/// A connected session.
///
/// Sends are serialized by an async mutex around the writer and the
/// session's scratch buffer, so concurrent callers never interleave frames.
pub struct Session {
    id: ConnectionId,
    remote: String,
    splitter: Arc<dyn PacketSplitter>,
    send: tokio::sync::Mutex<SendState>,
    groups: Mutex<HashSet<String>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(
        id: ConnectionId,
        remote: String,
        splitter: Arc<dyn PacketSplitter>,
        writer: BoxedWriter,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            remote,
            splitter,
            send: tokio::sync::Mutex::new(SendState {
                writer,
                scratch: BytesMut::with_capacity(4 * 1024),
            }),
            groups: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote endpoint description.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// True once the session has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frame `payload` and write it completely.
    ///
    /// # Errors
    ///
    /// `NotConnected` after close, including a close that interrupts a write
    /// stalled on a peer that stopped reading; I/O errors from the transport.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(WireError::NotConnected);
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut state = tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => return Err(WireError::NotConnected),
            state = self.send.lock() => state,
        };
        let SendState { writer, scratch } = &mut *state;
        let packet = self.splitter.make_packet(payload, scratch);
        tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => Err(WireError::NotConnected),
            written = write_fully(writer, packet) => written,
        }
    }

    /// Snapshot of the groups this session belongs to.
    pub fn groups(&self) -> Vec<String> {
        self.groups
            .lock()
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check membership in `group`.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.lock().map(|g| g.contains(group)).unwrap_or(false)
    }

    /// True when the session belongs to every group in `names`.
    ///
    /// A session without any membership is never authorized.
    pub(crate) fn member_of_all(&self, names: &[String]) -> bool {
        match self.groups.lock() {
            Ok(groups) => !groups.is_empty() && names.iter().all(|n| groups.contains(n)),
            Err(_) => false,
        }
    }

    /// Replace the membership set and return the previous one.
    pub(crate) fn replace_groups(&self, next: HashSet<String>) -> HashSet<String> {
        match self.groups.lock() {
            Ok(mut groups) => std::mem::replace(&mut *groups, next),
            Err(_) => HashSet::new(),
        }
    }

    pub(crate) fn add_group(&self, group: &str) {
        if let Ok(mut groups) = self.groups.lock() {
            groups.insert(group.to_string());
        }
    }

    pub(crate) fn take_groups(&self) -> HashSet<String> {
        self.replace_groups(HashSet::new())
    }

    /// Mark closed. Returns true for the first caller only.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Stop the reader and shut down the write half.
    ///
    /// In-flight sends give up the writer as soon as the signal is raised.
    pub(crate) async fn close(&self) {
        self.shutdown.send_replace(true);
        let mut state = self.send.lock().await;
        if let Err(e) = state.writer.shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.remote, e);
        }
    }

    /// Pump `reader` through the splitter, handing frames to `route`.
    ///
    /// Returns on EOF, on close, or on the first read/framing error.
    pub(crate) async fn read_loop(
        self: &Arc<Self>,
        mut reader: BoxedReader,
        route: &dyn FrameRoute,
    ) -> Result<()> {
        let mut frames = FrameBuffer::new(self.id, self.splitter.clone());
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let n = tokio::select! {
                _ = shutdown.wait_for(|closed| *closed) => return Ok(()),
                read = reader.read(&mut buf) => match read {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e) => return Err(WireError::Io(e)),
                },
            };

            for frame in frames.push(&buf[..n])? {
                route.route(self, frame).await;
            }
        }
    }
}

#[async_trait]
impl FrameSink for Session {
    async fn send_frame(&self, payload: &[u8]) -> Result<()> {
        self.send(payload).await
    }

    fn sink_id(&self) -> ConnectionId {
        self.id
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Inbound frame handling of the owning endpoint.
#[async_trait]
pub(crate) trait FrameRoute: Send + Sync {
    async fn route(&self, session: &Arc<Session>, frame: Frame);
}

/// Write the whole buffer, looping over partial writes.
async fn write_fully<W>(writer: &mut W, mut buf: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while !buf.is_empty() {
        let written = writer.write(buf).await?;
        if written == 0 {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write returned 0",
            )));
        }
        buf = &buf[written..];
    }
    writer.flush().await?;
    Ok(())
}
