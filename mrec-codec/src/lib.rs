//! Byte-level codec primitives shared across the MREC crates.
//!
//! Everything here is a pure function of its input: the length-prefix
//! codec used by the framing layer and key serialization, and the
//! CRC16 checksum used for per-chunk integrity.

pub mod crc16;
pub mod length;
