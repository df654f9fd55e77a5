//! # Key/Value Codecs and Key Ordering
//!
//! This module defines the two capabilities the tree core consumes for its
//! payload types: byte serialization ([`Codec`]) and key comparison
//! ([`KeyOrder`]). Both are supplied at handle construction, so the same
//! tree core serves any payload that can be written to and read back from
//! a byte stream.
//!
//! ## Codec Contract
//!
//! For a codec `c` and any item `x`:
//!
//! - `c.decode(&mut r)` after `c.encode(&x, &mut w)` over the same bytes
//!   yields a value equal to `x` (encode and decode are inverses).
//! - The encoding is stable across process runs. The provided integer
//!   codecs use the host byte order, matching the rest of the on-disk
//!   format; an index written on one architecture is not portable to
//!   another.
//! - `encoded_size` is advisory. The pager never assumes a fixed width;
//!   records are framed by their position in the data file, not by size.
//!
//! ## Provided Codecs
//!
//! - [`FixedIntCodec`]: fixed-width primitive integers, host-endian.
//! - [`BytesCodec`] / [`StringCodec`]: `u64` length prefix followed by the
//!   raw bytes. Strings are validated as UTF-8 on decode.
//! - [`VecCodec`]: `u64` element count followed by each element through an
//!   inner codec.
//!
//! ## Key Ordering
//!
//! Keys are totally ordered by a strict less-than predicate. Equality is
//! always derived from two `lt` calls rather than `PartialEq`, so a custom
//! comparator fully controls which keys collide. [`NaturalOrder`] covers
//! the common case of keys that already implement [`Ord`].

use std::io::{Read, Write};
use std::marker::PhantomData;

use eyre::{ensure, Result, WrapErr};

/// Byte serialization capability for one payload type.
///
/// Implementations must be pure: no hidden state may influence the encoded
/// bytes, and decoding must consume exactly the bytes encoding produced.
pub trait Codec {
    type Item;

    /// Writes the encoding of `item` to `out`.
    fn encode(&self, item: &Self::Item, out: &mut dyn Write) -> Result<()>;

    /// Reads one item from the current position of `input`.
    fn decode(&self, input: &mut dyn Read) -> Result<Self::Item>;

    /// Advisory encoded length of `item` in bytes.
    fn encoded_size(&self, item: &Self::Item) -> u64;
}

/// Strict weak ordering over keys.
pub trait KeyOrder<K> {
    /// Returns true when `a` sorts strictly before `b`.
    fn lt(&self, a: &K, b: &K) -> bool;

    /// Derived key equality: neither sorts before the other.
    fn eq(&self, a: &K, b: &K) -> bool {
        !self.lt(a, b) && !self.lt(b, a)
    }
}

/// Orders keys by their `Ord` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<K: Ord> KeyOrder<K> for NaturalOrder {
    fn lt(&self, a: &K, b: &K) -> bool {
        a < b
    }
}

/// Fixed-width, host-endian codec for primitive integers.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedIntCodec<T>(PhantomData<T>);

impl<T> FixedIntCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

macro_rules! impl_fixed_int_codec {
    ($($ty:ty),* $(,)?) => {$(
        impl Codec for FixedIntCodec<$ty> {
            type Item = $ty;

            fn encode(&self, item: &$ty, out: &mut dyn Write) -> Result<()> {
                out.write_all(&item.to_ne_bytes())
                    .wrap_err(concat!("failed to write ", stringify!($ty)))?;
                Ok(())
            }

            fn decode(&self, input: &mut dyn Read) -> Result<$ty> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                input
                    .read_exact(&mut buf)
                    .wrap_err(concat!("failed to read ", stringify!($ty)))?;
                Ok(<$ty>::from_ne_bytes(buf))
            }

            fn encoded_size(&self, _item: &$ty) -> u64 {
                std::mem::size_of::<$ty>() as u64
            }
        }
    )*};
}

impl_fixed_int_codec!(u16, u32, u64, i16, i32, i64);

fn write_len_prefix(len: usize, out: &mut dyn Write) -> Result<()> {
    out.write_all(&(len as u64).to_ne_bytes())
        .wrap_err("failed to write length prefix")?;
    Ok(())
}

fn read_len_prefix(input: &mut dyn Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    input
        .read_exact(&mut buf)
        .wrap_err("failed to read length prefix")?;
    Ok(u64::from_ne_bytes(buf))
}

fn read_len_prefixed_bytes(input: &mut dyn Read) -> Result<Vec<u8>> {
    let len = read_len_prefix(input)?;
    let mut bytes = Vec::new();
    (&mut *input)
        .take(len)
        .read_to_end(&mut bytes)
        .wrap_err("failed to read length-prefixed payload")?;
    ensure!(
        bytes.len() as u64 == len,
        "length-prefixed payload truncated: expected {} bytes, got {}",
        len,
        bytes.len()
    );
    Ok(bytes)
}

/// Length-prefixed raw byte strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Vec<u8>;

    fn encode(&self, item: &Vec<u8>, out: &mut dyn Write) -> Result<()> {
        write_len_prefix(item.len(), out)?;
        out.write_all(item).wrap_err("failed to write byte payload")?;
        Ok(())
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Vec<u8>> {
        read_len_prefixed_bytes(input)
    }

    fn encoded_size(&self, item: &Vec<u8>) -> u64 {
        8 + item.len() as u64
    }
}

/// Length-prefixed UTF-8 strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Item = String;

    fn encode(&self, item: &String, out: &mut dyn Write) -> Result<()> {
        write_len_prefix(item.len(), out)?;
        out.write_all(item.as_bytes())
            .wrap_err("failed to write string payload")?;
        Ok(())
    }

    fn decode(&self, input: &mut dyn Read) -> Result<String> {
        let bytes = read_len_prefixed_bytes(input)?;
        String::from_utf8(bytes).wrap_err("string payload is not valid UTF-8")
    }

    fn encoded_size(&self, item: &String) -> u64 {
        8 + item.len() as u64
    }
}

/// Homogeneous vectors through an inner codec, count-prefixed.
#[derive(Debug, Default, Clone, Copy)]
pub struct VecCodec<C>(pub C);

impl<C: Codec> Codec for VecCodec<C> {
    type Item = Vec<C::Item>;

    fn encode(&self, item: &Vec<C::Item>, out: &mut dyn Write) -> Result<()> {
        write_len_prefix(item.len(), out)?;
        for element in item {
            self.0.encode(element, out)?;
        }
        Ok(())
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Vec<C::Item>> {
        let count = read_len_prefix(input)?;
        let mut items = Vec::new();
        for _ in 0..count {
            items.push(self.0.decode(input)?);
        }
        Ok(items)
    }

    fn encoded_size(&self, item: &Vec<C::Item>) -> u64 {
        8 + item.iter().map(|e| self.0.encoded_size(e)).sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<C: Codec>(codec: &C, item: &C::Item) -> C::Item {
        let mut buf = Vec::new();
        codec.encode(item, &mut buf).unwrap();
        assert_eq!(buf.len() as u64, codec.encoded_size(item));
        codec.decode(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn fixed_int_roundtrip() {
        let codec = FixedIntCodec::<i32>::new();
        for value in [0, 1, -1, i32::MIN, i32::MAX, 12345] {
            assert_eq!(roundtrip(&codec, &value), value);
        }

        let codec = FixedIntCodec::<u64>::new();
        for value in [0, 1, u64::MAX, 0xDEAD_BEEF] {
            assert_eq!(roundtrip(&codec, &value), value);
        }
    }

    #[test]
    fn fixed_int_decode_truncated_fails() {
        let codec = FixedIntCodec::<u64>::new();
        let err = codec.decode(&mut [1u8, 2, 3].as_slice()).unwrap_err();
        assert!(err.to_string().contains("failed to read u64"));
    }

    #[test]
    fn bytes_roundtrip() {
        let codec = BytesCodec;
        for value in [Vec::new(), vec![0u8], vec![1, 2, 3, 255], vec![0u8; 4096]] {
            assert_eq!(roundtrip(&codec, &value), value);
        }
    }

    #[test]
    fn bytes_decode_truncated_fails() {
        let codec = BytesCodec;
        let mut buf = Vec::new();
        codec.encode(&vec![1u8, 2, 3, 4], &mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        let err = codec.decode(&mut buf.as_slice()).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn string_roundtrip() {
        let codec = StringCodec;
        for value in ["", "hello", "日本語", "embedded\0null"] {
            assert_eq!(roundtrip(&codec, &value.to_string()), value);
        }
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let string_codec = StringCodec;
        let bytes_codec = BytesCodec;

        let mut buf = Vec::new();
        bytes_codec.encode(&vec![0xFF, 0xFE, 0xFD], &mut buf).unwrap();

        let err = string_codec.decode(&mut buf.as_slice()).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn vec_codec_roundtrip() {
        let codec = VecCodec(FixedIntCodec::<u32>::new());
        for value in [vec![], vec![7u32], vec![1, 2, 3, u32::MAX]] {
            assert_eq!(roundtrip(&codec, &value), value);
        }
    }

    #[test]
    fn natural_order_derives_equality() {
        let order = NaturalOrder;
        assert!(KeyOrder::<i32>::lt(&order, &1, &2));
        assert!(!KeyOrder::<i32>::lt(&order, &2, &1));
        assert!(KeyOrder::<i32>::eq(&order, &5, &5));
        assert!(!KeyOrder::<i32>::eq(&order, &5, &6));
    }

    #[test]
    fn reverse_comparator_flips_ordering() {
        struct Reverse;
        impl KeyOrder<i32> for Reverse {
            fn lt(&self, a: &i32, b: &i32) -> bool {
                b < a
            }
        }

        let order = Reverse;
        assert!(order.lt(&9, &1));
        assert!(order.eq(&4, &4));
    }
}
