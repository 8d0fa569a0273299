//! Per-connection reassembly of frames from arbitrary read chunks.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Every read is
//! appended to the buffer and handed to the connection's [`PacketSplitter`];
//! the consumed prefix is frozen and sliced into frames, trailing partial
//! bytes stay in the buffer for the next read.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use duplexwire::protocol::{FrameBuffer, LengthPrefixSplitter};
//!
//! let mut buffer = FrameBuffer::new(1, Arc::new(LengthPrefixSplitter::new()));
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&[0, 0, 0, 2, b'h']).unwrap().is_empty());
//! let frames = buffer.push(b"i").unwrap();
//!
//! assert_eq!(frames[0].payload(), b"hi");
//! ```

use std::sync::Arc;

use bytes::BytesMut;

use super::frame::{ConnectionId, Frame};
use super::splitter::PacketSplitter;
use crate::error::Result;

const INITIAL_CAPACITY: usize = 64 * 1024;

/// Holds the unframed tail of a connection's input and cuts frames from it
/// with the configured [`PacketSplitter`].
pub struct FrameBuffer {
    /// Bytes read but not yet part of a complete frame.
    buffer: BytesMut,
    /// Framing strategy of the owning connection.
    splitter: Arc<dyn PacketSplitter>,
    /// Id stamped on every produced frame.
    connection_id: ConnectionId,
}

impl FrameBuffer {
    /// Create a new frame buffer with a 64KB initial capacity.
    pub fn new(connection_id: ConnectionId, splitter: Arc<dyn PacketSplitter>) -> Self {
        Self::with_capacity(connection_id, splitter, INITIAL_CAPACITY)
    }

    /// Create a new frame buffer with a custom initial capacity.
    pub fn with_capacity(
        connection_id: ConnectionId,
        splitter: Arc<dyn PacketSplitter>,
        capacity: usize,
    ) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            splitter,
            connection_id,
        }
    }

    /// Append a read chunk and return every frame it completes.
    ///
    /// Returns the frames in stream order (may be empty if still waiting for
    /// data). Partial data is kept internally for the next push.
    ///
    /// # Errors
    ///
    /// Propagates protocol errors from the splitter; the buffered bytes are
    /// left untouched in that case.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let result = self.splitter.split(&self.buffer)?;
        if result.consumed == 0 {
            return Ok(Vec::new());
        }

        // Frames share the frozen prefix; the remainder keeps its allocation.
        let consumed = self.buffer.split_to(result.consumed).freeze();
        Ok(result
            .spans
            .into_iter()
            .map(|span| Frame::new(self.connection_id, consumed.slice(span)))
            .collect())
    }

    /// Connection id stamped on produced frames.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Bytes waiting for the rest of their frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any buffered partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
