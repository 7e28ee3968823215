//! Paillier cryptosystem for privacy-preserving tallies.
//!
//! The key pair is derived deterministically from a member's own ECDH
//! key material (see [`derive`]), so the same identity regenerates
//! the same voting keys without storing them. Ciphertexts are
//! additively homomorphic: the product of two ciphertexts decrypts to
//! the sum of their plaintexts, which is what lets a tallier count
//! votes without opening individual ballots.

use thiserror::Error;

pub mod codec;
pub mod derive;
pub mod keys;

pub use derive::{derive_keypair, DerivationConfig};
pub use keys::{PaillierKeyPair, PaillierPrivateKey, PaillierPublicKey};

#[derive(Debug, Error)]
pub enum Error {
    /// A plaintext does not fit below the key modulus.
    #[error("message out of range for the key modulus")]
    MessageOutOfRange,
    /// A ciphertext is not a valid group element for the key.
    #[error("ciphertext out of range for the key modulus")]
    CiphertextOutOfRange,
    /// The prime search ran out of attempts.
    #[error("prime generation exhausted after {attempts} attempts")]
    PrimeGenerationExhausted { attempts: usize },
    /// The caller cancelled key derivation.
    #[error("key derivation was cancelled")]
    DerivationCancelled,
    /// The supplied primes do not form a usable key.
    #[error("primes do not form a valid Paillier key")]
    InvalidPrimes,
    /// A serialized key buffer does not start with the key magic.
    #[error("invalid key buffer magic")]
    InvalidKeyMagic,
    /// A serialized key buffer carries an unknown version.
    #[error("unsupported key buffer version {0:#06x}")]
    UnsupportedKeyVersion(u16),
    /// The embedded key identifier does not match the key material.
    #[error("key identifier does not match the key material")]
    KeyIdMismatch,
    /// A serialized key buffer is truncated or malformed.
    #[error("key buffer truncated or malformed")]
    InvalidKeyBuffer,
    #[error(transparent)]
    Length(#[from] mrec_codec::length::Error),
    #[error(transparent)]
    Secure(#[from] mrec_crypto::secure::Error),
    #[error(transparent)]
    Key(#[from] mrec_crypto::key::secp256k1::Error),
}

impl Error {
    pub fn reason_key(&self) -> &'static str {
        match self {
            Error::MessageOutOfRange => "error.paillier.messageOutOfRange",
            Error::CiphertextOutOfRange => "error.paillier.ciphertextOutOfRange",
            Error::PrimeGenerationExhausted { .. } => "error.paillier.primeGenerationExhausted",
            Error::DerivationCancelled => "error.paillier.derivationCancelled",
            Error::InvalidPrimes => "error.paillier.invalidPrimes",
            Error::InvalidKeyMagic => "error.paillier.invalidKeyMagic",
            Error::UnsupportedKeyVersion(_) => "error.paillier.unsupportedKeyVersion",
            Error::KeyIdMismatch => "error.paillier.keyIdMismatch",
            Error::InvalidKeyBuffer => "error.paillier.invalidKeyBuffer",
            Error::Length(_) => "error.paillier.lengthCodec",
            Error::Secure(_) => "error.paillier.secureBuffer",
            Error::Key(_) => "error.paillier.key",
        }
    }
}
