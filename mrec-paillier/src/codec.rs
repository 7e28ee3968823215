//! Key serialization.
//!
//! Public keys travel as `magic, then version, then keyId, then length-prefixed
//! n`, where the key id is an HKDF digest of the modulus so that a
//! parser can detect a buffer whose id and material drifted apart.
//! Private keys serialize as length-prefixed components held inside a
//! [`SecureBuffer`].

use num_bigint::BigUint;

use mrec_codec::length::{decode_length_encoded_data, length_encode_data};
use mrec_crypto::kdf::hkdf_sha512;
use mrec_crypto::SecureBuffer;

use crate::keys::{PaillierPrivateKey, PaillierPublicKey};
use crate::Error;

pub const KEY_MAGIC: [u8; 4] = *b"PAIL";
pub const KEY_VERSION: u16 = 0x0001;
pub const KEY_ID_SIZE: usize = 8;
const KEY_ID_DOMAIN: &[u8] = b"PaillierKeyId";

/// Short identifier binding a serialized key to its modulus.
pub fn key_id(public: &PaillierPublicKey) -> [u8; KEY_ID_SIZE] {
    let mut id = [0u8; KEY_ID_SIZE];
    hkdf_sha512(&public.n().to_bytes_be(), &[], KEY_ID_DOMAIN, &mut id)
        .expect("8 bytes is within hkdf output range");
    id
}

pub fn serialize_public(public: &PaillierPublicKey) -> Vec<u8> {
    let n_bytes = length_encode_data(&public.n().to_bytes_be());
    let mut out = Vec::with_capacity(4 + 2 + KEY_ID_SIZE + n_bytes.len());
    out.extend_from_slice(&KEY_MAGIC);
    out.extend_from_slice(&KEY_VERSION.to_be_bytes());
    out.extend_from_slice(&key_id(public));
    out.extend_from_slice(&n_bytes);
    out
}

pub fn parse_public(buf: &[u8]) -> Result<PaillierPublicKey, Error> {
    if buf.len() < 4 + 2 + KEY_ID_SIZE {
        return Err(Error::InvalidKeyBuffer);
    }
    if buf[..4] != KEY_MAGIC {
        return Err(Error::InvalidKeyMagic);
    }
    let version = u16::from_be_bytes([buf[4], buf[5]]);
    if version != KEY_VERSION {
        return Err(Error::UnsupportedKeyVersion(version));
    }
    let declared_id = &buf[6..6 + KEY_ID_SIZE];

    let decoded = decode_length_encoded_data(&buf[6 + KEY_ID_SIZE..])?;
    let public = PaillierPublicKey::new(BigUint::from_bytes_be(decoded.data))
        .map_err(|_| Error::InvalidKeyBuffer)?;

    if declared_id != key_id(&public).as_slice() {
        return Err(Error::KeyIdMismatch);
    }
    Ok(public)
}

/// Serialize the private key into an obfuscated buffer:
/// length-prefixed `p, then q, then lambda, then mu`.
pub fn serialize_private(private: &PaillierPrivateKey) -> SecureBuffer {
    let mut out = Vec::new();
    for component in [private.p(), private.q(), private.lambda(), private.mu()] {
        out.extend_from_slice(&length_encode_data(&component.to_bytes_be()));
    }
    SecureBuffer::new(out)
}

pub fn parse_private(buffer: &SecureBuffer) -> Result<PaillierPrivateKey, Error> {
    let bytes = buffer.value()?;
    let mut offset = 0;
    let mut components = Vec::with_capacity(4);
    for _ in 0..4 {
        let decoded = decode_length_encoded_data(&bytes[offset..])?;
        components.push(BigUint::from_bytes_be(decoded.data));
        offset += decoded.consumed;
    }
    if offset != bytes.len() {
        return Err(Error::InvalidKeyBuffer);
    }
    let mu = components.pop().expect("four components");
    let lambda = components.pop().expect("four components");
    let q = components.pop().expect("four components");
    let p = components.pop().expect("four components");
    PaillierPrivateKey::from_components(p, q, lambda, mu)
}
