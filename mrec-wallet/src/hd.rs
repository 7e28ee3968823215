//! BIP32 hierarchical deterministic derivation over secp256k1.
//!
//! Master key from `HMAC-SHA512("Bitcoin seed", seed)`, hardened and
//! normal child steps per BIP32, with the scalar arithmetic done on
//! `k256` field elements.

use hmac::{Hmac, Mac};
use k256::elliptic_curve::ff::{Field, PrimeField};
use k256::Scalar;
use sha2::Sha512;
use std::str::FromStr;

use mrec_crypto::key::secp256k1::SecretKey;
use mrec_crypto::memsec::Scrubbed as _;

use crate::Error;

type HmacSha512 = Hmac<Sha512>;

const MASTER_KEY_DOMAIN: &[u8] = b"Bitcoin seed";
const HARDENED_OFFSET: u32 = 0x8000_0000;

/// One step of a BIP32 path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildNumber {
    Normal(u32),
    Hardened(u32),
}

impl ChildNumber {
    fn index(self) -> u32 {
        match self {
            Self::Normal(i) => i,
            Self::Hardened(i) => i | HARDENED_OFFSET,
        }
    }

    fn is_hardened(self) -> bool {
        matches!(self, Self::Hardened(_))
    }
}

/// A parsed BIP32 path such as `m/44'/60'/0'/0/0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath(Vec<ChildNumber>);

impl DerivationPath {
    pub fn steps(&self) -> &[ChildNumber] {
        &self.0
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidDerivationPath(s.to_string());

        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(invalid());
        }
        let mut steps = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix(&['\'', 'h', 'H'][..]) {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let index: u32 = digits.parse().map_err(|_| invalid())?;
            if index >= HARDENED_OFFSET {
                return Err(invalid());
            }
            steps.push(if hardened {
                ChildNumber::Hardened(index)
            } else {
                ChildNumber::Normal(index)
            });
        }
        Ok(Self(steps))
    }
}

impl std::fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("m")?;
        for step in &self.0 {
            match step {
                ChildNumber::Normal(i) => write!(f, "/{i}")?,
                ChildNumber::Hardened(i) => write!(f, "/{i}'")?,
            }
        }
        Ok(())
    }
}

/// BIP32 extended private key: scalar plus chain code.
pub struct Bip32PrivateKey {
    key: [u8; 32],
    chain_code: [u8; 32],
}

impl Bip32PrivateKey {
    /// Derive the master key from a BIP39 seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, Error> {
        let digest = hmac_sha512(MASTER_KEY_DOMAIN, &[seed]);
        Self::from_digest(&digest).ok_or(Error::InvalidSeed)
    }

    fn from_digest(digest: &[u8; 64]) -> Option<Self> {
        let mut key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        key.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);

        // left half must be a usable scalar
        let scalar: Option<Scalar> = Scalar::from_repr(key.into()).into();
        match scalar {
            Some(s) if !bool::from(s.is_zero()) => Some(Self { key, chain_code }),
            _ => None,
        }
    }

    /// Derive one child step.
    pub fn derive(&self, child: ChildNumber) -> Result<Self, Error> {
        let index = child.index();
        let digest = if child.is_hardened() {
            hmac_sha512(
                &self.chain_code,
                &[&[0u8], &self.key[..], &index.to_be_bytes()],
            )
        } else {
            let public = self.to_signing_key().public_key();
            hmac_sha512(&self.chain_code, &[public.as_ref(), &index.to_be_bytes()])
        };

        let mut left = [0u8; 32];
        let mut chain_code = [0u8; 32];
        left.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);

        let tweak: Option<Scalar> = Scalar::from_repr(left.into()).into();
        let tweak = tweak.ok_or(Error::InvalidChildKey(index))?;
        let parent: Option<Scalar> = Scalar::from_repr(self.key.into()).into();
        let parent = parent.ok_or(Error::InvalidChildKey(index))?;

        let child_scalar = tweak + parent;
        if bool::from(child_scalar.is_zero()) {
            return Err(Error::InvalidChildKey(index));
        }

        left.scrub();
        Ok(Self {
            key: child_scalar.to_repr().into(),
            chain_code,
        })
    }

    /// Derive along a full path.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, Error> {
        let mut key = Self {
            key: self.key,
            chain_code: self.chain_code,
        };
        for &step in path.steps() {
            key = key.derive(step)?;
        }
        Ok(key)
    }

    /// The plain signing key at this node.
    pub fn to_signing_key(&self) -> SecretKey {
        SecretKey::from_bytes(self.key).expect("scalar validated at derivation")
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }
}

impl Drop for Bip32PrivateKey {
    fn drop(&mut self) {
        self.key.scrub();
        self.chain_code.scrub();
    }
}

impl std::fmt::Debug for Bip32PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bip32PrivateKey").finish_non_exhaustive()
    }
}

fn hmac_sha512(key: &[u8], parts: &[&[u8]]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}
