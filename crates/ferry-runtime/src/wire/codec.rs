//! Canonical byte encoding for values crossing the bridge
//!
//! Numbers are fixed-width big-endian. Strings, byte arrays, sequences and
//! maps carry an `i32` length/count prefix. Optionals carry a one byte
//! presence flag. Tagged unions carry an `i32` 1-based tag followed by the
//! variant payload, and records are their fields concatenated in
//! declaration order, so field order is part of the wire contract.

use crate::fault::Fault;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("negative length prefix {0}")]
    NegativeLength(i32),

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("invalid boolean byte {0}")]
    InvalidBool(i8),

    #[error("invalid optional flag {0}")]
    InvalidOptionFlag(u8),

    #[error("unknown variant tag {tag} for {type_name}")]
    UnknownVariant { type_name: &'static str, tag: i32 },

    #[error("nanoseconds out of range: {0}")]
    InvalidNanos(u32),

    #[error("timestamp out of range")]
    TimestampOutOfRange,

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// A type with a canonical wire encoding
///
/// `read` must consume exactly the bytes `write` produced.
pub trait WireCodec: Sized {
    /// Append the encoding of `self` to `buf`
    fn write(&self, buf: &mut Vec<u8>);

    /// Decode one value from the front of `buf`, advancing it
    fn read(buf: &mut &[u8]) -> Result<Self, CodecError>;
}

/// Encode a value into a fresh byte vector
pub fn encode<T: WireCodec>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.write(&mut buf);
    buf
}

/// Decode a top-level value, requiring the input to be fully consumed
pub fn decode_exact<T: WireCodec>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut cursor = bytes;
    let value = T::read(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(CodecError::TrailingBytes(cursor.len()));
    }
    Ok(value)
}

/// Split `n` bytes off the front of `buf`
pub fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if buf.len() < n {
        return Err(CodecError::UnexpectedEof {
            needed: n,
            remaining: buf.len(),
        });
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

/// Write an `i32` length prefix; lengths beyond `i32::MAX` are a usage fault
pub fn write_len(buf: &mut Vec<u8>, len: usize, what: &'static str) {
    let len = i32::try_from(len).unwrap_or_else(|_| Fault::LengthOverflow { what, len }.raise());
    len.write(buf);
}

/// Read an `i32` length prefix
pub fn read_len(buf: &mut &[u8]) -> Result<usize, CodecError> {
    let len = i32::read(buf)?;
    if len < 0 {
        return Err(CodecError::NegativeLength(len));
    }
    Ok(len as usize)
}

macro_rules! impl_numeric {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireCodec for $ty {
                fn write(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_be_bytes());
                }

                fn read(buf: &mut &[u8]) -> Result<Self, CodecError> {
                    let bytes = take(buf, std::mem::size_of::<$ty>())?;
                    let mut array = [0u8; std::mem::size_of::<$ty>()];
                    array.copy_from_slice(bytes);
                    Ok(<$ty>::from_be_bytes(array))
                }
            }
        )*
    };
}

impl_numeric!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

// Unit results carry no payload.
impl WireCodec for () {
    fn write(&self, _buf: &mut Vec<u8>) {}

    fn read(_buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(())
    }
}

impl WireCodec for bool {
    fn write(&self, buf: &mut Vec<u8>) {
        (*self as i8).write(buf);
    }

    fn read(buf: &mut &[u8]) -> Result<Self, CodecError> {
        match i8::read(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }
}

impl WireCodec for String {
    fn write(&self, buf: &mut Vec<u8>) {
        write_len(buf, self.len(), "string");
        buf.extend_from_slice(self.as_bytes());
    }

    fn read(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let len = read_len(buf)?;
        let bytes = take(buf, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl<T: WireCodec> WireCodec for Option<T> {
    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            None => buf.push(0),
            Some(value) => {
                buf.push(1);
                value.write(buf);
            }
        }
    }

    fn read(buf: &mut &[u8]) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(None),
            1 => Ok(Some(T::read(buf)?)),
            other => Err(CodecError::InvalidOptionFlag(other)),
        }
    }
}

// A byte array is a sequence of u8, so `Vec<u8>` gets the length-prefixed
// raw-bytes encoding from this impl.
impl<T: WireCodec> WireCodec for Vec<T> {
    fn write(&self, buf: &mut Vec<u8>) {
        write_len(buf, self.len(), "sequence");
        for item in self {
            item.write(buf);
        }
    }

    fn read(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let count = read_len(buf)?;
        // Cap the preallocation: the count comes from the other side.
        let mut items = Vec::with_capacity(count.min(buf.len()));
        for _ in 0..count {
            items.push(T::read(buf)?);
        }
        Ok(items)
    }
}

impl<K, V> WireCodec for HashMap<K, V>
where
    K: WireCodec + Eq + Hash,
    V: WireCodec,
{
    fn write(&self, buf: &mut Vec<u8>) {
        write_len(buf, self.len(), "map");
        for (key, value) in self {
            key.write(buf);
            value.write(buf);
        }
    }

    fn read(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let count = read_len(buf)?;
        let mut map = HashMap::with_capacity(count.min(buf.len()));
        for _ in 0..count {
            let key = K::read(buf)?;
            let value = V::read(buf)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl WireCodec for Duration {
    fn write(&self, buf: &mut Vec<u8>) {
        self.as_secs().write(buf);
        self.subsec_nanos().write(buf);
    }

    fn read(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let secs = u64::read(buf)?;
        let nanos = u32::read(buf)?;
        if nanos >= 1_000_000_000 {
            return Err(CodecError::InvalidNanos(nanos));
        }
        Ok(Duration::new(secs, nanos))
    }
}

// Seconds are signed relative to the epoch; nanos always count forward.
impl WireCodec for SystemTime {
    fn write(&self, buf: &mut Vec<u8>) {
        let (secs, nanos) = match self.duration_since(UNIX_EPOCH) {
            Ok(after) => (after.as_secs() as i64, after.subsec_nanos()),
            Err(before) => {
                let before = before.duration();
                let nanos = before.subsec_nanos();
                if nanos == 0 {
                    (-(before.as_secs() as i64), 0)
                } else {
                    (-(before.as_secs() as i64) - 1, 1_000_000_000 - nanos)
                }
            }
        };
        secs.write(buf);
        nanos.write(buf);
    }

    fn read(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let secs = i64::read(buf)?;
        let nanos = u32::read(buf)?;
        if nanos >= 1_000_000_000 {
            return Err(CodecError::InvalidNanos(nanos));
        }
        let time = if secs >= 0 {
            UNIX_EPOCH.checked_add(Duration::new(secs as u64, nanos))
        } else {
            UNIX_EPOCH
                .checked_sub(Duration::from_secs(secs.unsigned_abs()))
                .and_then(|t| t.checked_add(Duration::from_nanos(nanos as u64)))
        };
        time.ok_or(CodecError::TimestampOutOfRange)
    }
}
