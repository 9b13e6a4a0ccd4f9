//! The self-describing argument wire format carried inside a
//! [`crate::dispatch::PosixCall`]'s `args` payload (spec §4.I).
//!
//! Grounded on `original_source/.../posix_proxy/include/serialize.h`
//! (`DataType`, `IntegerStorage`, `PointStorage`, `Serialize`/
//! `Deserialize`/`CalculateBuffSize`). Per Design Note §9, the raw
//! `(uint32 tag, payload)` scheme is replaced with a typed deserializer
//! returning an owned sum of `I64`/`Slice<'shm>`: every tag is checked
//! against what the caller expects at that position, every pointer's
//! declared length is checked against the remaining buffer, and a
//! mismatch is a decode error rather than an unchecked re-cast.

use crate::error::{ProxyError, Result};

/// `INTEGERTYPE` — all integers cross the wire as 64-bit values.
pub const INTEGER_TYPE: u64 = 17;
/// `POINTTYPE` — a length-prefixed buffer.
pub const POINT_TYPE: u64 = 18;

const TAG_SIZE: usize = 8;
const COUNT_SIZE: usize = 4;

/// One decoded argument, borrowing its pointer payload from the request
/// buffer it was parsed out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PosixArg<'a> {
    /// An `IntegerStorage` value.
    I64(i64),
    /// A `PointStorage` buffer, borrowed read-only from the shared
    /// request buffer.
    Ptr(&'a [u8]),
}

impl<'a> PosixArg<'a> {
    /// This argument's wire tag, for error reporting.
    pub fn tag(&self) -> u64 {
        match self {
            PosixArg::I64(_) => INTEGER_TYPE,
            PosixArg::Ptr(_) => POINT_TYPE,
        }
    }

    /// Narrow to an integer, or a [`ProxyError::TagMismatch`] naming
    /// `index`.
    pub fn as_i64(&self, index: usize) -> Result<i64> {
        match self {
            PosixArg::I64(v) => Ok(*v),
            PosixArg::Ptr(_) => Err(ProxyError::TagMismatch { index, expected: INTEGER_TYPE, found: POINT_TYPE }),
        }
    }

    /// Narrow to a pointer buffer, or a [`ProxyError::TagMismatch`]
    /// naming `index`.
    pub fn as_ptr(&self, index: usize) -> Result<&'a [u8]> {
        match self {
            PosixArg::Ptr(b) => Ok(b),
            PosixArg::I64(_) => Err(ProxyError::TagMismatch { index, expected: POINT_TYPE, found: INTEGER_TYPE }),
        }
    }
}

/// Parse `argCount` then that many self-describing `(tag, ...)` items out
/// of `buf` (`Deserialize`), bound-checking every pointer length against
/// the remaining buffer.
pub fn decode_args(buf: &[u8]) -> Result<Vec<PosixArg<'_>>> {
    if buf.len() < COUNT_SIZE {
        return Err(ProxyError::TruncatedHeader);
    }
    let count = u32::from_ne_bytes(buf[0..COUNT_SIZE].try_into().unwrap());
    let mut pos = COUNT_SIZE;
    let mut out = Vec::with_capacity(count as usize);

    for index in 0..count as usize {
        if buf.len() < pos + TAG_SIZE {
            return Err(ProxyError::TruncatedHeader);
        }
        let tag = u64::from_ne_bytes(buf[pos..pos + TAG_SIZE].try_into().unwrap());
        pos += TAG_SIZE;
        match tag {
            INTEGER_TYPE => {
                if buf.len() < pos + 8 {
                    return Err(ProxyError::TruncatedHeader);
                }
                let value = i64::from_ne_bytes(buf[pos..pos + 8].try_into().unwrap());
                pos += 8;
                out.push(PosixArg::I64(value));
            }
            POINT_TYPE => {
                if buf.len() < pos + 8 {
                    return Err(ProxyError::TruncatedHeader);
                }
                let size = u64::from_ne_bytes(buf[pos..pos + 8].try_into().unwrap()) as usize;
                pos += 8;
                if buf.len() < pos + size {
                    return Err(ProxyError::PointerOutOfBounds { index, size });
                }
                out.push(PosixArg::Ptr(&buf[pos..pos + size]));
                pos += size;
            }
            other => return Err(ProxyError::TagMismatch { index, expected: INTEGER_TYPE, found: other }),
        }
    }
    Ok(out)
}

/// One argument ready to be serialized into a reply buffer — the owned
/// counterpart of [`PosixArg`] (`CalculateBuffSize` + `Serialize`'s
/// variadic pack, made concrete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutArg {
    /// An `IntegerStorage` value.
    I64(i64),
    /// A `PointStorage` buffer owned by the reply.
    Ptr(Vec<u8>),
}

impl OutArg {
    fn encoded_len(&self) -> usize {
        match self {
            OutArg::I64(_) => TAG_SIZE + 8,
            OutArg::Ptr(b) => TAG_SIZE + 8 + b.len(),
        }
    }
}

/// Encode `args` into the same self-describing format [`decode_args`]
/// reads, prefixed with the count (`Serialize`).
pub fn encode_args(args: &[OutArg]) -> Vec<u8> {
    let total = COUNT_SIZE + args.iter().map(OutArg::encoded_len).sum::<usize>();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(args.len() as u32).to_ne_bytes());
    for arg in args {
        match arg {
            OutArg::I64(v) => {
                out.extend_from_slice(&INTEGER_TYPE.to_ne_bytes());
                out.extend_from_slice(&v.to_ne_bytes());
            }
            OutArg::Ptr(b) => {
                out.extend_from_slice(&POINT_TYPE.to_ne_bytes());
                out.extend_from_slice(&(b.len() as u64).to_ne_bytes());
                out.extend_from_slice(b);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_mix_of_integers_and_pointers() {
        let encoded = encode_args(&[OutArg::I64(42), OutArg::Ptr(b"hello".to_vec()), OutArg::I64(-7)]);
        let decoded = decode_args(&encoded).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_i64(0).unwrap(), 42);
        assert_eq!(decoded[1].as_ptr(1).unwrap(), b"hello");
        assert_eq!(decoded[2].as_i64(2).unwrap(), -7);
    }

    #[test]
    fn rejects_a_pointer_whose_declared_size_overruns_the_buffer() {
        let mut encoded = encode_args(&[OutArg::Ptr(b"hello".to_vec())]);
        // Lie about the size: bump it past what's actually present.
        let size_off = COUNT_SIZE + TAG_SIZE;
        encoded[size_off..size_off + 8].copy_from_slice(&999u64.to_ne_bytes());
        let err = decode_args(&encoded).unwrap_err();
        assert!(matches!(err, ProxyError::PointerOutOfBounds { index: 0, .. }));
    }

    #[test]
    fn narrowing_to_the_wrong_type_is_a_tag_mismatch() {
        let decoded = decode_args(&encode_args(&[OutArg::I64(1)])).unwrap();
        let err = decoded[0].as_ptr(0).unwrap_err();
        assert!(matches!(err, ProxyError::TagMismatch { index: 0, .. }));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        assert!(matches!(decode_args(&[1, 0]).unwrap_err(), ProxyError::TruncatedHeader));
    }

    #[test]
    fn empty_arg_list_round_trips() {
        let encoded = encode_args(&[]);
        assert!(decode_args(&encoded).unwrap().is_empty());
    }
}
