//! Password wrapping of mnemonics for local storage.
//!
//! A passphrase is stretched with PBKDF2-HMAC-SHA-512 into an
//! AES-256-GCM key which wraps the mnemonic sentence. The wrapped
//! form is a plain byte string suitable for a browser local-storage
//! slot or a keychain entry.

use bip39::rand_core::{CryptoRng, RngCore};
use bip39::{Language, Mnemonic};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;

use mrec_crypto::cipher::{self, IV_SIZE, KEY_SIZE, TAG_SIZE};
use mrec_crypto::memsec::Scrubbed as _;

use crate::Error;

const SALT_SIZE: usize = 16;
const WRAP_AAD: &[u8] = b"mrec-mnemonic-wrap-v1";

/// PBKDF2 work profile. The default follows current OWASP guidance
/// for SHA-512.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pbkdf2Profile {
    pub iterations: u32,
}

impl Default for Pbkdf2Profile {
    fn default() -> Self {
        Self { iterations: 210_000 }
    }
}

/// A mnemonic wrapped under a passphrase-derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedMnemonic {
    iterations: u32,
    salt: [u8; SALT_SIZE],
    iv: [u8; IV_SIZE],
    tag: [u8; TAG_SIZE],
    body: Vec<u8>,
}

impl WrappedMnemonic {
    const PREFIX_SIZE: usize = 4 + SALT_SIZE + IV_SIZE + TAG_SIZE;

    /// Wrap `mnemonic` under `password`.
    pub fn wrap<T: RngCore + CryptoRng>(
        mut rng: T,
        mnemonic: &Mnemonic,
        password: &str,
        profile: Pbkdf2Profile,
    ) -> Result<Self, Error> {
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);
        let iv = cipher::random_iv(&mut rng);

        let mut key = stretch(password, &salt, profile.iterations);
        let mut sentence = mnemonic.to_string();
        let sealed = cipher::seal(&key, &iv, WRAP_AAD, sentence.as_bytes());
        key.scrub();
        sentence.scrub();

        let (body, tag) = sealed.map_err(|_| Error::WrapperDataFailedToDecrypt)?;
        Ok(Self {
            iterations: profile.iterations,
            salt,
            iv,
            tag,
            body,
        })
    }

    /// Recover the mnemonic, verifying the authentication tag.
    pub fn unwrap_mnemonic(&self, password: &str) -> Result<Mnemonic, Error> {
        let mut key = stretch(password, &self.salt, self.iterations);
        let opened = cipher::open(&key, &self.iv, WRAP_AAD, &self.body, &self.tag);
        key.scrub();

        let mut sentence = opened.map_err(|_| Error::WrapperDataFailedToDecrypt)?;
        let parsed = std::str::from_utf8(&sentence)
            .map_err(|_| Error::WrapperDataFailedToDecrypt)
            .and_then(|s| {
                Mnemonic::parse_in_normalized(Language::English, s).map_err(Error::Mnemonic)
            });
        sentence.scrub();
        parsed
    }

    /// Storage form: iterations BE, then salt, then iv, then tag, then body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::PREFIX_SIZE + self.body.len());
        out.extend_from_slice(&self.iterations.to_be_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::PREFIX_SIZE {
            return Err(Error::WrapperDataInvalidSize);
        }
        let mut offset = 0;
        let iterations = u32::from_be_bytes(bytes[..4].try_into().expect("sized"));
        offset += 4;

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[offset..offset + SALT_SIZE]);
        offset += SALT_SIZE;

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[offset..offset + IV_SIZE]);
        offset += IV_SIZE;

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&bytes[offset..offset + TAG_SIZE]);
        offset += TAG_SIZE;

        Ok(Self {
            iterations,
            salt,
            iv,
            tag,
            body: bytes[offset..].to_vec(),
        })
    }
}

fn stretch(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, iterations, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use bip39::rand_core::OsRng;

    // keep the tests quick; the default profile is for production
    const TEST_PROFILE: Pbkdf2Profile = Pbkdf2Profile { iterations: 1_000 };

    fn mnemonic() -> Mnemonic {
        Mnemonic::parse_in_normalized(
            Language::English,
            "test test test test test test test test test test test junk",
        )
        .unwrap()
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let wrapped = WrappedMnemonic::wrap(OsRng, &mnemonic(), "hunter2", TEST_PROFILE).unwrap();
        let unwrapped = wrapped.unwrap_mnemonic("hunter2").unwrap();
        assert_eq!(unwrapped.to_string(), mnemonic().to_string());
    }

    #[test]
    fn wrong_password_fails() {
        let wrapped = WrappedMnemonic::wrap(OsRng, &mnemonic(), "hunter2", TEST_PROFILE).unwrap();
        assert!(matches!(
            wrapped.unwrap_mnemonic("hunter3"),
            Err(Error::WrapperDataFailedToDecrypt)
        ));
    }

    #[test]
    fn storage_roundtrip() {
        let wrapped = WrappedMnemonic::wrap(OsRng, &mnemonic(), "hunter2", TEST_PROFILE).unwrap();
        let restored = WrappedMnemonic::from_bytes(&wrapped.to_bytes()).unwrap();
        assert_eq!(restored, wrapped);
        assert_eq!(
            restored.unwrap_mnemonic("hunter2").unwrap().to_string(),
            mnemonic().to_string()
        );
    }

    #[test]
    fn truncated_storage_is_rejected() {
        let wrapped = WrappedMnemonic::wrap(OsRng, &mnemonic(), "hunter2", TEST_PROFILE).unwrap();
        let bytes = wrapped.to_bytes();
        assert!(matches!(
            WrappedMnemonic::from_bytes(&bytes[..10]),
            Err(Error::WrapperDataInvalidSize)
        ));
    }

    #[test]
    fn tampered_body_fails() {
        let wrapped = WrappedMnemonic::wrap(OsRng, &mnemonic(), "hunter2", TEST_PROFILE).unwrap();
        let mut bytes = wrapped.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = WrappedMnemonic::from_bytes(&bytes).unwrap();
        assert!(matches!(
            tampered.unwrap_mnemonic("hunter2"),
            Err(Error::WrapperDataFailedToDecrypt)
        ));
    }
}
