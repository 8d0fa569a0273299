//! Frame struct and connection identifiers.
//!
//! A frame is one complete message cut out of a byte stream, tagged with the
//! connection it arrived on. Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use duplexwire::protocol::Frame;
//! use bytes::Bytes;
//!
//! let frame = Frame::new(7, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.connection_id(), 7);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Process-unique connection identifier.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh connection id.
///
/// Ids start at 1 and are never handed out twice within a process.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A complete frame received on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Connection the frame arrived on.
    pub connection_id: ConnectionId,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(connection_id: ConnectionId, payload: Bytes) -> Self {
        Self {
            connection_id,
            payload,
        }
    }

    /// Create a frame from raw bytes (copies data).
    pub fn from_slice(connection_id: ConnectionId, payload: &[u8]) -> Self {
        Self {
            connection_id,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get the connection id.
    #[inline]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Read the leading big-endian `u32` of the payload, if present.
    ///
    /// Control and RPC frames start with a 4-byte mark.
    #[inline]
    pub fn leading_mark(&self) -> Option<u32> {
        leading_mark(&self.payload)
    }
}

/// Read the leading big-endian `u32` of a buffer, if it is long enough.
#[inline]
pub fn leading_mark(buf: &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::new(3, Bytes::from_static(b"abc"));
        assert_eq!(frame.connection_id(), 3);
        assert_eq!(frame.payload(), b"abc");
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_from_slice_copies() {
        let data = vec![1u8, 2, 3];
        let frame = Frame::from_slice(1, &data);
        drop(data);
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_payload_bytes_is_cheap_clone() {
        let frame = Frame::new(1, Bytes::from_static(b"shared"));
        let clone = frame.payload_bytes();
        assert_eq!(clone.as_ptr(), frame.payload.as_ptr());
    }

    #[test]
    fn test_leading_mark() {
        let frame = Frame::new(1, Bytes::from_static(&[0xFA, 0x9F, 0xCB, 0x89, 0x00]));
        assert_eq!(frame.leading_mark(), Some(0xFA9F_CB89));

        let short = Frame::new(1, Bytes::from_static(&[1, 2, 3]));
        assert_eq!(short.leading_mark(), None);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let ids: Vec<ConnectionId> = (0..100).map(|_| next_connection_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
        assert!(ids.iter().all(|&id| id > 0));
    }
}
