//! Payload serialization.
//!
//! Everything structured on the wire (RPC bodies, call arguments, return
//! values, group descriptors) is MessagePack produced by [`MsgPackCodec`].
//! Framing and tags stay binary and never go through the codec.

mod msgpack;

pub use msgpack::MsgPackCodec;
