//! Pluggable framing strategy.
//!
//! A [`PacketSplitter`] turns an unbounded byte stream into frames and wraps
//! outgoing payloads for the wire. Two strategies ship with the crate:
//! [`LengthPrefixSplitter`](super::LengthPrefixSplitter) (default) and
//! [`EndMarkSplitter`](super::EndMarkSplitter).

use std::ops::Range;

use bytes::{Bytes, BytesMut};

use super::frame::{ConnectionId, Frame};
use crate::error::Result;

/// Outcome of a single [`PacketSplitter::split`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitResult {
    /// Payload ranges into the input buffer, in stream order.
    pub spans: Vec<Range<usize>>,
    /// Number of leading input bytes fully consumed by `spans`.
    ///
    /// Bytes past this offset belong to an incomplete frame and must be
    /// presented again with the next read.
    pub consumed: usize,
}

impl SplitResult {
    /// True when no complete frame was found.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Framing strategy used by every stream connection.
pub trait PacketSplitter: Send + Sync + 'static {
    /// Find every complete frame in `buf`.
    ///
    /// Must be safely re-invocable on the unconsumed remainder: trailing bytes
    /// without a full boundary are reported as not consumed.
    ///
    /// # Errors
    ///
    /// Returns a protocol error only for inconsistent input (e.g. a length
    /// header above the configured maximum). Missing data is not an error.
    fn split(&self, buf: &[u8]) -> Result<SplitResult>;

    /// Wrap `payload` for the wire, reusing `scratch` as the output store.
    ///
    /// `scratch` is cleared and resized in place, so a connection can keep a
    /// single buffer for all its sends. Strategies that leave the payload
    /// untouched may return `payload` directly.
    fn make_packet<'a>(&self, payload: &'a [u8], scratch: &'a mut BytesMut) -> &'a [u8];

    /// Split a frozen buffer into zero-copy frames tagged with `connection_id`.
    ///
    /// Returns the frames and the consumed end offset.
    fn split_frames(&self, buf: &Bytes, connection_id: ConnectionId) -> Result<(Vec<Frame>, usize)> {
        let result = self.split(buf)?;
        let frames = result
            .spans
            .into_iter()
            .map(|span| Frame::new(connection_id, buf.slice(span)))
            .collect();
        Ok((frames, result.consumed))
    }
}
