//! Protocol module - framing strategies, frame buffer, and frame types.
//!
//! This module turns byte streams into discrete messages and back:
//! - [`PacketSplitter`] trait with length-prefix and end-mark strategies
//! - [`FrameBuffer`] for accumulating partial reads
//! - [`Frame`] struct tagged with the originating connection

mod end_mark;
mod frame;
mod frame_buffer;
mod length_prefix;
mod splitter;

pub use end_mark::EndMarkSplitter;
pub use frame::{leading_mark, next_connection_id, ConnectionId, Frame};
pub use frame_buffer::FrameBuffer;
pub use length_prefix::{
    decode_length, encode_length, LengthPrefixSplitter, DEFAULT_MAX_PAYLOAD_SIZE,
    LENGTH_HEADER_SIZE,
};
pub use splitter::{PacketSplitter, SplitResult};
