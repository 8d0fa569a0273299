//! Marker-delimited framing.
//!
//! Each frame is followed by a fixed marker byte sequence:
//! ```text
//! ┌──────────────────┬──────────┐
//! │ Message          │ End Mark │
//! └──────────────────┴──────────┘
//! ```
//!
//! There is no escaping. A payload that contains the marker bytes is cut at
//! that point and arrives as two frames; callers choosing this strategy must
//! guarantee the marker never appears in their messages (text protocols with
//! `\r\n`, for instance).

use bytes::{BufMut, BytesMut};

use super::splitter::{PacketSplitter, SplitResult};
use crate::error::{Result, WireError};

/// Marker-delimited framing strategy.
#[derive(Debug, Clone)]
pub struct EndMarkSplitter {
    end_mark: Vec<u8>,
    include_end_mark: bool,
    use_make_packet: bool,
}

impl EndMarkSplitter {
    /// Create a splitter for the given marker.
    ///
    /// `include_end_mark` controls whether delivered frames keep the marker.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the marker is empty.
    pub fn new(end_mark: impl Into<Vec<u8>>, include_end_mark: bool) -> Result<Self> {
        let end_mark = end_mark.into();
        if end_mark.is_empty() {
            return Err(WireError::Protocol("End mark must not be empty".to_string()));
        }
        Ok(Self {
            end_mark,
            include_end_mark,
            use_make_packet: true,
        })
    }

    /// Disable or enable outgoing framing.
    ///
    /// With `false`, [`make_packet`](PacketSplitter::make_packet) passes the
    /// payload through untouched. Used when an outer layer already guarantees
    /// message boundaries.
    pub fn use_make_packet(mut self, enabled: bool) -> Self {
        self.use_make_packet = enabled;
        self
    }

    /// The marker bytes.
    pub fn end_mark(&self) -> &[u8] {
        &self.end_mark
    }

    /// Whether delivered frames keep the marker.
    pub fn includes_end_mark(&self) -> bool {
        self.include_end_mark
    }

    /// Whether outgoing payloads get a marker appended.
    pub fn makes_packets(&self) -> bool {
        self.use_make_packet
    }

    fn find_mark(&self, buf: &[u8], from: usize) -> Option<usize> {
        buf[from..]
            .windows(self.end_mark.len())
            .position(|window| window == self.end_mark.as_slice())
            .map(|offset| from + offset)
    }
}

impl PacketSplitter for EndMarkSplitter {
    fn split(&self, buf: &[u8]) -> Result<SplitResult> {
        let mark_len = self.end_mark.len();
        let mut result = SplitResult::default();
        let mut pos = 0usize;

        while pos < buf.len() {
            let Some(found) = self.find_mark(buf, pos) else {
                break;
            };

            // Marker at the head of the remainder is an empty message.
            if found == pos {
                pos += mark_len;
                continue;
            }

            let end = if self.include_end_mark {
                found + mark_len
            } else {
                found
            };
            result.spans.push(pos..end);
            pos = found + mark_len;
        }

        result.consumed = pos;
        Ok(result)
    }

    fn make_packet<'a>(&self, payload: &'a [u8], scratch: &'a mut BytesMut) -> &'a [u8] {
        if !self.use_make_packet {
            return payload;
        }

        scratch.clear();
        scratch.reserve(payload.len() + self.end_mark.len());
        scratch.put_slice(payload);
        scratch.put_slice(&self.end_mark);
        &scratch[..]
    }
}
