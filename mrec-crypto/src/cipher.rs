//! AES-256-GCM with detached tags.
//!
//! The framing layer stores IV, tag and body as separate header
//! fields, so the seal/open functions here keep the tag detached
//! rather than appended.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand_core::{CryptoRng, RngCore};
use thiserror::Error;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("initialization vector must be {IV_SIZE} bytes")]
    InvalidIv,
    #[error("authentication tag rejected")]
    InvalidAuthTag,
}

impl Error {
    pub fn reason_key(&self) -> &'static str {
        match self {
            Error::InvalidIv => "error.crypto.invalidIv",
            Error::InvalidAuthTag => "error.crypto.invalidAuthTag",
        }
    }
}

/// Encrypt `plaintext`, binding `aad`, returning the ciphertext body
/// and the detached 16-byte tag.
pub fn seal(
    key: &[u8; KEY_SIZE],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE]), Error> {
    if iv.len() != IV_SIZE {
        return Err(Error::InvalidIv);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::InvalidAuthTag)?;

    let body_len = sealed.len() - TAG_SIZE;
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&sealed[body_len..]);
    sealed.truncate(body_len);
    Ok((sealed, tag))
}

/// Decrypt a ciphertext body with its detached tag, verifying `aad`.
pub fn open(
    key: &[u8; KEY_SIZE],
    iv: &[u8],
    aad: &[u8],
    body: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, Error> {
    if iv.len() != IV_SIZE {
        return Err(Error::InvalidIv);
    }
    if tag.len() != TAG_SIZE {
        return Err(Error::InvalidAuthTag);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut sealed = Vec::with_capacity(body.len() + TAG_SIZE);
    sealed.extend_from_slice(body);
    sealed.extend_from_slice(tag);
    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: &sealed,
                aad,
            },
        )
        .map_err(|_| Error::InvalidAuthTag)
}

/// Fresh random content-encryption key.
pub fn random_key<Rng>(mut rng: Rng) -> [u8; KEY_SIZE]
where
    Rng: RngCore + CryptoRng,
{
    let mut key = [0u8; KEY_SIZE];
    rng.fill_bytes(&mut key);
    key
}

/// Fresh random 96-bit IV.
pub fn random_iv<Rng>(mut rng: Rng) -> [u8; IV_SIZE]
where
    Rng: RngCore + CryptoRng,
{
    let mut iv = [0u8; IV_SIZE];
    rng.fill_bytes(&mut iv);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn seal_open_roundtrip() {
        let key = random_key(OsRng);
        let iv = random_iv(OsRng);
        let (body, tag) = seal(&key, &iv, b"header", b"payload").unwrap();
        assert_eq!(body.len(), b"payload".len());
        let opened = open(&key, &iv, b"header", &body, &tag).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let key = random_key(OsRng);
        let iv = random_iv(OsRng);
        let (body, tag) = seal(&key, &iv, b"", b"").unwrap();
        assert!(body.is_empty());
        assert_eq!(open(&key, &iv, b"", &body, &tag).unwrap(), b"");
    }

    #[test]
    fn tampered_body_is_rejected() {
        let key = random_key(OsRng);
        let iv = random_iv(OsRng);
        let (mut body, tag) = seal(&key, &iv, b"", b"payload").unwrap();
        body[0] ^= 0x01;
        assert_eq!(
            open(&key, &iv, b"", &body, &tag),
            Err(Error::InvalidAuthTag)
        );
    }

    #[test]
    fn wrong_aad_is_rejected() {
        let key = random_key(OsRng);
        let iv = random_iv(OsRng);
        let (body, tag) = seal(&key, &iv, b"aad", b"payload").unwrap();
        assert_eq!(
            open(&key, &iv, b"other", &body, &tag),
            Err(Error::InvalidAuthTag)
        );
    }

    #[test]
    fn short_iv_is_rejected() {
        let key = random_key(OsRng);
        assert_eq!(seal(&key, &[0u8; 8], b"", b"x"), Err(Error::InvalidIv));
    }
}
