//! Argument lists.
//!
//! Arguments travel as a list of independently MsgPack-encoded values, one
//! entry per parameter. Tuples up to six elements implement both directions:
//!
//! ```
//! use duplexwire::rpc::{FromArgs, IntoArgs};
//!
//! let args = ("hi", 3u32).into_args().unwrap();
//! assert_eq!(args.len(), 2);
//!
//! let (text, n): (String, u32) = FromArgs::from_args(&args).unwrap();
//! assert_eq!((text.as_str(), n), ("hi", 3));
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::error::{Result, WireError};

/// Encode a parameter list.
pub trait IntoArgs {
    fn into_args(self) -> Result<Vec<Bytes>>;
}

/// Decode a parameter list.
pub trait FromArgs: Sized {
    /// Expected number of arguments.
    const ARITY: usize;

    fn from_args(args: &[Bytes]) -> Result<Self>;
}

fn encode_arg<T: Serialize>(value: &T) -> Result<Bytes> {
    MsgPackCodec::encode_bytes(value)
}

fn decode_arg<T: DeserializeOwned>(raw: &Bytes, index: usize) -> Result<T> {
    MsgPackCodec::decode(raw)
        .map_err(|e| WireError::InvalidArguments(format!("argument {}: {}", index, e)))
}

fn check_arity<T: FromArgs>(args: &[Bytes]) -> Result<()> {
    let expected = T::ARITY;
    if args.len() != expected {
        return Err(WireError::InvalidArguments(format!(
            "expected {} arguments, got {}",
            expected,
            args.len()
        )));
    }
    Ok(())
}

impl IntoArgs for () {
    fn into_args(self) -> Result<Vec<Bytes>> {
        Ok(Vec::new())
    }
}

impl FromArgs for () {
    const ARITY: usize = 0;

    fn from_args(args: &[Bytes]) -> Result<Self> {
        check_arity::<Self>(args)
    }
}

macro_rules! tuple_args {
    ($arity:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: Serialize),+> IntoArgs for ($($name,)+) {
            fn into_args(self) -> Result<Vec<Bytes>> {
                Ok(vec![$(encode_arg(&self.$idx)?),+])
            }
        }

        impl<$($name: DeserializeOwned),+> FromArgs for ($($name,)+) {
            const ARITY: usize = $arity;

            fn from_args(args: &[Bytes]) -> Result<Self> {
                check_arity::<Self>(args)?;
                Ok(($(decode_arg::<$name>(&args[$idx], $idx)?,)+))
            }
        }
    };
}

tuple_args!(1; A 0);
tuple_args!(2; A 0, B 1);
tuple_args!(3; A 0, B 1, C 2);
tuple_args!(4; A 0, B 1, C 2, D 3);
tuple_args!(5; A 0, B 1, C 2, D 3, E 4);
tuple_args!(6; A 0, B 1, C 2, D 3, E 4, F 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_argument_encoded_separately() {
        let args = ("a", 1u8, vec![true]).into_args().unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(&args[0][..], &[0xa1, b'a']);
        assert_eq!(&args[1][..], &[0x01]);
    }

    #[test]
    fn test_arity_mismatch() {
        assert_eq!(<(String, String)>::ARITY, 2);
        assert!(<()>::from_args(&[Bytes::new()]).is_err());

        let args = ("only one",).into_args().unwrap();
        let err = <(String, String)>::from_args(&args).unwrap_err();
        assert!(matches!(err, WireError::InvalidArguments(m) if m.contains("expected 2")));
    }

    #[test]
    fn test_type_mismatch_names_argument() {
        let args = (1u32, "text").into_args().unwrap();
        let err = <(u32, u32)>::from_args(&args).unwrap_err();
        assert!(matches!(err, WireError::InvalidArguments(m) if m.starts_with("argument 1")));
    }

    #[test]
    fn test_unit_args() {
        assert!(().into_args().unwrap().is_empty());
        assert!(<()>::from_args(&[]).is_ok());
        assert!(<()>::from_args(&[Bytes::new()]).is_err());
    }
}
