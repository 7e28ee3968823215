//! Length-prefix codec.
//!
//! A prefix is one tag byte selecting the width of a big-endian length
//! field, followed by the length itself. The encoder always picks the
//! smallest width that fits, so encoding is canonical: a given length
//! has exactly one valid prefix.

use thiserror::Error;

/// Largest length a decoder will accept. Kept at 2^53 - 1 so that
/// lengths survive a round-trip through consumers that represent
/// integers as IEEE-754 doubles.
pub const MAX_SAFE_LENGTH: u64 = (1 << 53) - 1;

/// Width tag for a one-byte length field.
pub const TAG_U8: u8 = 1;
/// Width tag for a two-byte length field.
pub const TAG_U16: u8 = 2;
/// Width tag for a four-byte length field.
pub const TAG_U32: u8 = 4;
/// Width tag for an eight-byte length field.
pub const TAG_U64: u8 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The tag byte is not one of the four known widths.
    #[error("unknown length prefix tag {0:#04x}")]
    LengthIsInvalidType(u8),
    /// The buffer ends before the declared length field or payload.
    #[error("buffer too short for the declared length")]
    LengthIsTooShort,
    /// The declared length does not fit in 2^53 - 1.
    #[error("declared length {0} exceeds the interop maximum")]
    LengthExceedsMaximum(u64),
}

impl Error {
    /// Stable reason key for the external translation layer.
    pub fn reason_key(&self) -> &'static str {
        match self {
            Error::LengthIsInvalidType(_) => "error.length.invalidType",
            Error::LengthIsTooShort => "error.length.tooShort",
            Error::LengthExceedsMaximum(_) => "error.length.exceedsMaximum",
        }
    }
}

/// Encode `length` as the smallest tag + big-endian field that fits.
pub fn encode_length(length: u64) -> Vec<u8> {
    if length <= u8::MAX as u64 {
        vec![TAG_U8, length as u8]
    } else if length <= u16::MAX as u64 {
        let mut out = vec![TAG_U16];
        out.extend_from_slice(&(length as u16).to_be_bytes());
        out
    } else if length <= u32::MAX as u64 {
        let mut out = vec![TAG_U32];
        out.extend_from_slice(&(length as u32).to_be_bytes());
        out
    } else {
        let mut out = vec![TAG_U64];
        out.extend_from_slice(&length.to_be_bytes());
        out
    }
}

/// Decode a length prefix, returning the length and the number of
/// bytes consumed by the prefix.
pub fn decode_length(buf: &[u8]) -> Result<(u64, usize), Error> {
    let tag = *buf.first().ok_or(Error::LengthIsTooShort)?;
    let width = match tag {
        TAG_U8 => 1,
        TAG_U16 => 2,
        TAG_U32 => 4,
        TAG_U64 => 8,
        other => return Err(Error::LengthIsInvalidType(other)),
    };
    if buf.len() < 1 + width {
        return Err(Error::LengthIsTooShort);
    }
    let mut value = 0u64;
    for &byte in &buf[1..1 + width] {
        value = (value << 8) | byte as u64;
    }
    if value > MAX_SAFE_LENGTH {
        return Err(Error::LengthExceedsMaximum(value));
    }
    Ok((value, 1 + width))
}

/// A payload recovered from a length-prefixed buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Decoded<'a> {
    pub data: &'a [u8],
    /// Total bytes consumed: prefix plus payload.
    pub consumed: usize,
}

/// Prefix `data` with its encoded length.
pub fn length_encode_data(data: &[u8]) -> Vec<u8> {
    let mut out = encode_length(data.len() as u64);
    out.extend_from_slice(data);
    out
}

/// Recover a length-prefixed payload from the front of `buf`.
pub fn decode_length_encoded_data(buf: &[u8]) -> Result<Decoded<'_>, Error> {
    let (length, prefix) = decode_length(buf)?;
    let end = prefix
        .checked_add(length as usize)
        .ok_or(Error::LengthIsTooShort)?;
    if buf.len() < end {
        return Err(Error::LengthIsTooShort);
    }
    Ok(Decoded {
        data: &buf[prefix..end],
        consumed: end,
    })
}
