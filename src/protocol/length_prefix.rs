//! Length-delimited framing.
//!
//! Each frame is preceded by a fixed 4-byte length header:
//! ```text
//! ┌──────────┬──────────────────┐
//! │ Length   │ Payload          │
//! │ 4 bytes  │ Length bytes     │
//! │ uint32 BE│                  │
//! └──────────┴──────────────────┘
//! ```
//!
//! Boundaries are computed arithmetically from the header, never by scanning
//! payload content, so any byte sequence is a valid payload.

use bytes::{BufMut, BytesMut};

use super::splitter::{PacketSplitter, SplitResult};
use crate::error::{Result, WireError};

/// Length header size in bytes.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Encode a length header.
///
/// # Example
///
/// ```
/// use duplexwire::protocol::encode_length;
///
/// assert_eq!(encode_length(258), [0, 0, 1, 2]);
/// ```
#[inline]
pub fn encode_length(len: u32) -> [u8; LENGTH_HEADER_SIZE] {
    len.to_be_bytes()
}

/// Decode a length header.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_HEADER_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Length-prefixed framing strategy (the default).
#[derive(Debug, Clone)]
pub struct LengthPrefixSplitter {
    max_payload_size: u32,
}

impl LengthPrefixSplitter {
    /// Create a splitter with the default maximum payload size.
    pub fn new() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Create a splitter with a custom maximum payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self { max_payload_size }
    }

    /// Maximum accepted payload size.
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    fn validate(&self, len: u32) -> Result<()> {
        if len > self.max_payload_size {
            return Err(WireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                len, self.max_payload_size
            )));
        }
        Ok(())
    }
}

impl Default for LengthPrefixSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSplitter for LengthPrefixSplitter {
    fn split(&self, buf: &[u8]) -> Result<SplitResult> {
        let mut result = SplitResult::default();
        let mut pos = 0usize;

        while let Some(len) = decode_length(&buf[pos..]) {
            self.validate(len)?;

            let start = pos + LENGTH_HEADER_SIZE;
            let end = start + len as usize;
            if end > buf.len() {
                break;
            }

            result.spans.push(start..end);
            pos = end;
        }

        result.consumed = pos;
        Ok(result)
    }

    fn make_packet<'a>(&self, payload: &'a [u8], scratch: &'a mut BytesMut) -> &'a [u8] {
        scratch.clear();
        scratch.reserve(LENGTH_HEADER_SIZE + payload.len());
        scratch.put_slice(&encode_length(payload.len() as u32));
        scratch.put_slice(payload);
        &scratch[..]
    }
}
