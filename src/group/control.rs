//! Group control frames.
//!
//! ```text
//! Join:      ┌────────────┬──────────────────────────────┐
//!            │ JOIN mark  │ MsgPack [group names]        │
//!            │ u32 BE     │ ≤ 1024 bytes                 │
//!            └────────────┴──────────────────────────────┘
//!
//! Transmit:  ┌────────────┬──────────┬────────────┬──────────────┐
//!            │ TX mark    │ desc len │ descriptor │ inner message│
//!            │ u32 BE     │ u16 BE   │ MsgPack    │ rest         │
//!            └────────────┴──────────┴────────────┴──────────────┘
//! ```

use std::collections::HashSet;

use bytes::Bytes;

use crate::codec::MsgPackCodec;
use crate::error::{Result, WireError};
use crate::protocol::leading_mark;

/// Join-group control mark.
pub const JOIN_GROUP_MARK: u32 = 0xFA9F_CB89;

/// Group transmit, sender excluded.
pub const GROUP_TRANSMIT_MARK: u32 = 0xBCA2_BAD4;

/// Group transmit, sender included.
pub const GROUP_TRANSMIT_LOOP_BACK_MARK: u32 = 0xECA2_BAD3;

/// Maximum encoded size of a group descriptor.
pub const MAX_GROUP_DESCRIPTOR_LEN: usize = 1024;

const MARK_LEN: usize = 4;
const DESC_LEN_LEN: usize = 2;

/// A decoded group control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Replace the sender's membership.
    Join(HashSet<String>),
    /// Forward `payload` to the members of `groups`.
    Transmit {
        groups: Vec<String>,
        loop_back: bool,
        payload: Bytes,
    },
}

/// True for the three reserved group marks.
pub fn is_control_mark(mark: u32) -> bool {
    matches!(
        mark,
        JOIN_GROUP_MARK | GROUP_TRANSMIT_MARK | GROUP_TRANSMIT_LOOP_BACK_MARK
    )
}

fn encode_descriptor<S: AsRef<str>>(groups: &[S]) -> Result<Vec<u8>> {
    let names: Vec<&str> = groups.iter().map(|g| g.as_ref()).collect();
    let desc = MsgPackCodec::encode(&names)?;
    if desc.len() > MAX_GROUP_DESCRIPTOR_LEN {
        return Err(WireError::Protocol(format!(
            "Group descriptor size {} exceeds maximum {}",
            desc.len(),
            MAX_GROUP_DESCRIPTOR_LEN
        )));
    }
    Ok(desc)
}

/// Build a join frame.
///
/// # Errors
///
/// Fails if the encoded name list exceeds [`MAX_GROUP_DESCRIPTOR_LEN`].
pub fn encode_join<S: AsRef<str>>(groups: &[S]) -> Result<Vec<u8>> {
    let desc = encode_descriptor(groups)?;
    let mut out = Vec::with_capacity(MARK_LEN + desc.len());
    out.extend_from_slice(&JOIN_GROUP_MARK.to_be_bytes());
    out.extend_from_slice(&desc);
    Ok(out)
}

/// Build a transmit frame wrapping `payload`.
pub fn encode_transmit<S: AsRef<str>>(groups: &[S], payload: &[u8], loop_back: bool) -> Result<Vec<u8>> {
    let desc = encode_descriptor(groups)?;
    let mark = if loop_back {
        GROUP_TRANSMIT_LOOP_BACK_MARK
    } else {
        GROUP_TRANSMIT_MARK
    };

    let mut out = Vec::with_capacity(MARK_LEN + DESC_LEN_LEN + desc.len() + payload.len());
    out.extend_from_slice(&mark.to_be_bytes());
    out.extend_from_slice(&(desc.len() as u16).to_be_bytes());
    out.extend_from_slice(&desc);
    out.extend_from_slice(payload);
    Ok(out)
}

impl ControlFrame {
    /// Decode a frame that starts with one of the group marks.
    ///
    /// The inner payload of a transmit frame is a zero-copy slice of `buf`.
    ///
    /// # Errors
    ///
    /// Protocol error for an unknown mark, a truncated frame or an oversized
    /// descriptor; decode error for a malformed name list.
    pub fn parse(buf: &Bytes) -> Result<Self> {
        let mark = leading_mark(buf)
            .ok_or_else(|| WireError::Protocol("Control frame too short".to_string()))?;

        match mark {
            JOIN_GROUP_MARK => {
                let desc = &buf[MARK_LEN..];
                check_descriptor_len(desc.len())?;
                let names: Vec<String> = MsgPackCodec::decode(desc)?;
                Ok(ControlFrame::Join(names.into_iter().collect()))
            }
            GROUP_TRANSMIT_MARK | GROUP_TRANSMIT_LOOP_BACK_MARK => {
                let header_end = MARK_LEN + DESC_LEN_LEN;
                if buf.len() < header_end {
                    return Err(WireError::Protocol("Transmit frame truncated".to_string()));
                }
                let desc_len = u16::from_be_bytes([buf[MARK_LEN], buf[MARK_LEN + 1]]) as usize;
                check_descriptor_len(desc_len)?;
                let desc_end = header_end + desc_len;
                if buf.len() < desc_end {
                    return Err(WireError::Protocol("Transmit descriptor truncated".to_string()));
                }
                let groups: Vec<String> = MsgPackCodec::decode(&buf[header_end..desc_end])?;
                Ok(ControlFrame::Transmit {
                    groups,
                    loop_back: mark == GROUP_TRANSMIT_LOOP_BACK_MARK,
                    payload: buf.slice(desc_end..),
                })
            }
            other => Err(WireError::Protocol(format!(
                "Not a group control mark: {:#010x}",
                other
            ))),
        }
    }
}

fn check_descriptor_len(len: usize) -> Result<()> {
    if len > MAX_GROUP_DESCRIPTOR_LEN {
        return Err(WireError::Protocol(format!(
            "Group descriptor size {} exceeds maximum {}",
            len, MAX_GROUP_DESCRIPTOR_LEN
        )));
    }
    Ok(())
}
