//! MessagePack codec using `rmp-serde`.
//!
//! Structs are written as maps keyed by field name (`to_vec_named`), so
//! peers in other languages can decode request and response bodies without
//! knowing the Rust field order.
//!
//! ```
//! use duplexwire::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&("Echo", 3u8)).unwrap();
//! let (name, n): (String, u8) = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!((name.as_str(), n), ("Echo", 3));
//! ```

use bytes::Bytes;

use crate::error::Result;

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value; structs become maps.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode straight into a shareable buffer.
    #[inline]
    pub fn encode_bytes<T: serde::Serialize + ?Sized>(value: &T) -> Result<Bytes> {
        Self::encode(value).map(Bytes::from)
    }

    /// Decode a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
