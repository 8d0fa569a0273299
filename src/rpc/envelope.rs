//! RPC frame header.
//!
//! ```text
//! Stream transports:
//! ┌──────────┬──────────┬─────────────────────┐
//! │ Tag      │ Call ID  │ MsgPack body        │
//! │ u32 BE   │ u64 BE   │ request or response │
//! └──────────┴──────────┴─────────────────────┘
//!
//! Datagram transports add the sender's listening port:
//! ┌──────────┬──────────┬────────────┬──────────────┐
//! │ Tag      │ Call ID  │ Reply Port │ MsgPack body │
//! │ u32 BE   │ u64 BE   │ u16 BE     │              │
//! └──────────┴──────────┴────────────┴──────────────┘
//! ```
//!
//! Tags are distinct from the group control marks, so RPC traffic, group
//! control frames and plain application messages share one connection.
//!
//! Header and body are arbitrary binary, so RPC endpoints only run over
//! length-prefix framing: an end marker could occur inside any call id.

use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::config::FramingConfig;
use crate::error::{Result, WireError};
use crate::protocol::leading_mark;

/// Tag of a request frame.
pub const RPC_REQUEST_MARK: u32 = 0xD0C5_A001;

/// Tag of a response frame.
pub const RPC_RESPONSE_MARK: u32 = 0xD0C5_A002;

/// Header size on stream transports.
pub const RPC_HEADER_SIZE: usize = 12;

/// Header size on datagram transports.
pub const RPC_DATAGRAM_HEADER_SIZE: usize = 14;

/// Direction of an RPC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    Request,
    Response,
}

impl RpcKind {
    fn mark(self) -> u32 {
        match self {
            RpcKind::Request => RPC_REQUEST_MARK,
            RpcKind::Response => RPC_RESPONSE_MARK,
        }
    }

    /// Classify a buffer by its leading tag.
    pub fn of(buf: &[u8]) -> Option<Self> {
        match leading_mark(buf)? {
            RPC_REQUEST_MARK => Some(RpcKind::Request),
            RPC_RESPONSE_MARK => Some(RpcKind::Response),
            _ => None,
        }
    }
}

/// Decoded RPC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcHeader {
    pub kind: RpcKind,
    pub call_id: u64,
    /// Present on datagram transports only.
    pub reply_port: Option<u16>,
}

impl RpcHeader {
    /// Header for a stream transport.
    pub fn new(kind: RpcKind, call_id: u64) -> Self {
        Self {
            kind,
            call_id,
            reply_port: None,
        }
    }

    /// Header carrying the sender's reply port.
    pub fn with_reply_port(kind: RpcKind, call_id: u64, reply_port: u16) -> Self {
        Self {
            kind,
            call_id,
            reply_port: Some(reply_port),
        }
    }

    /// Encoded header size.
    pub fn encoded_len(&self) -> usize {
        if self.reply_port.is_some() {
            RPC_DATAGRAM_HEADER_SIZE
        } else {
            RPC_HEADER_SIZE
        }
    }

    /// Append the header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.kind.mark().to_be_bytes());
        out.extend_from_slice(&self.call_id.to_be_bytes());
        if let Some(port) = self.reply_port {
            out.extend_from_slice(&port.to_be_bytes());
        }
    }

    /// Decode a header; `datagram` selects the layout with reply port.
    ///
    /// Returns the header and the body offset, or `None` for a buffer that is
    /// not an RPC frame or is too short.
    pub fn decode(buf: &[u8], datagram: bool) -> Option<(Self, usize)> {
        let kind = RpcKind::of(buf)?;
        let size = if datagram {
            RPC_DATAGRAM_HEADER_SIZE
        } else {
            RPC_HEADER_SIZE
        };
        if buf.len() < size {
            return None;
        }

        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[4..12]);
        let reply_port = datagram.then(|| u16::from_be_bytes([buf[12], buf[13]]));

        Some((
            Self {
                kind,
                call_id: u64::from_be_bytes(id),
                reply_port,
            },
            size,
        ))
    }
}

/// Build a complete RPC frame: header followed by the MsgPack body.
pub fn encode_frame<T: Serialize>(header: &RpcHeader, body: &T) -> Result<Vec<u8>> {
    let body = MsgPackCodec::encode(body)?;
    let mut out = Vec::with_capacity(header.encoded_len() + body.len());
    header.encode_into(&mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Reject framings that cannot carry binary RPC frames.
pub(crate) fn require_binary_framing(framing: &FramingConfig) -> Result<()> {
    match framing {
        FramingConfig::LengthPrefix { .. } => Ok(()),
        FramingConfig::EndMark { .. } => Err(WireError::Protocol(
            "RPC requires length-prefix framing".to_string(),
        )),
    }
}
