//! secp256k1 Asymmetric Keys
//!
//! [`SecretKey`] is a scalar in `[1, n-1]` used for ECDSA signing and
//! ECDH agreement. Its associated [`PublicKey`] is stored and
//! exchanged in the 33-byte compressed SEC1 form throughout; the
//! 65-byte uncompressed form exists only transiently for wallet
//! interop.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{CryptoRng, RngCore};
use std::{convert::TryFrom, fmt, str::FromStr};
use thiserror::Error;

use crate::memsec::Scrubbed as _;

/// secp256k1 Secret Key
#[derive(Clone)]
pub struct SecretKey([u8; Self::SIZE]);

/// secp256k1 Public Key in compressed SEC1 form. Can be used to verify
/// a [`Signature`] and as the static party of an ECDH agreement.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; Self::SIZE]);

/// ECDSA Signature in fixed 64-byte `r || s` form, low-s normalized.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; Self::SIZE]);

/// X coordinate of an ECDH shared point. Scrubbed on drop.
pub struct SharedSecret([u8; Self::SIZE]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The bytes do not decode to a point on secp256k1.
    #[error("public key is not a valid secp256k1 point")]
    InvalidPublicKeyNotOnCurve,
    /// The scalar is zero or not below the group order.
    #[error("invalid secp256k1 secret scalar")]
    InvalidSecretKey,
    /// ECDH agreement failed.
    #[error("could not compute a shared secret")]
    InvalidSharedSecret,
    /// A byte buffer has the wrong length for the type.
    #[error("invalid size, expecting {expected}")]
    InvalidSize { expected: usize },
}

impl Error {
    pub fn reason_key(&self) -> &'static str {
        match self {
            Error::InvalidPublicKeyNotOnCurve => "error.crypto.publicKeyNotOnCurve",
            Error::InvalidSecretKey => "error.crypto.invalidSecretKey",
            Error::InvalidSharedSecret => "error.crypto.invalidSharedSecret",
            Error::InvalidSize { .. } => "error.crypto.invalidSize",
        }
    }
}

impl SecretKey {
    pub const SIZE: usize = 32;

    /// generate a new [`SecretKey`] with the given random number generator
    pub fn new<Rng>(mut rng: Rng) -> Self
    where
        Rng: RngCore + CryptoRng,
    {
        let scalar = k256::SecretKey::random(&mut rng);
        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(&scalar.to_bytes());
        Self(bytes)
    }

    /// Rebuild a key from its 32 raw bytes, rejecting zero and
    /// out-of-range scalars.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, Error> {
        k256::SecretKey::from_slice(&bytes).map_err(|_| Error::InvalidSecretKey)?;
        Ok(Self(bytes))
    }

    fn inner(&self) -> k256::SecretKey {
        // the scalar was validated on construction
        k256::SecretKey::from_slice(&self.0).expect("validated scalar")
    }

    /// get the [`PublicKey`] associated to this key in compressed form
    pub fn public_key(&self) -> PublicKey {
        let point = self.inner().public_key().to_encoded_point(true);
        let mut bytes = [0u8; PublicKey::SIZE];
        bytes.copy_from_slice(point.as_bytes());
        PublicKey(bytes)
    }

    /// create a [`Signature`] for the given message with this [`SecretKey`].
    ///
    /// The message is digested with SHA-256 and signed deterministically
    /// (RFC 6979); the signature is low-s normalized.
    pub fn sign<T>(&self, msg: T) -> Signature
    where
        T: AsRef<[u8]>,
    {
        let signing_key = SigningKey::from(&self.inner());
        let signature: k256::ecdsa::Signature = signing_key.sign(msg.as_ref());
        let signature = signature.normalize_s().unwrap_or(signature);

        let mut bytes = [0u8; Signature::SIZE];
        bytes.copy_from_slice(&signature.to_bytes());
        Signature(bytes)
    }

    /// Compute the ECDH shared secret with the given public key,
    /// returning the X coordinate of the shared point.
    pub fn ecdh(&self, public: &PublicKey) -> Result<SharedSecret, Error> {
        let point = k256::PublicKey::from_sec1_bytes(&public.0)
            .map_err(|_| Error::InvalidPublicKeyNotOnCurve)?;
        let shared =
            k256::ecdh::diffie_hellman(self.inner().to_nonzero_scalar(), point.as_affine());

        let mut bytes = [0u8; SharedSecret::SIZE];
        bytes.copy_from_slice(shared.raw_secret_bytes());
        Ok(SharedSecret(bytes))
    }

    /// convert the [`SecretKey`] into its raw byte composition
    ///
    /// # Safety
    ///
    /// This function is not safe because:
    ///
    /// * using it removes all the security measure we put in place
    ///   to protect your private key: opaque [`Debug`] impl, zeroisation on [`Drop`], ...
    /// * you will need to be careful not to leak the bytes
    ///
    /// There are valid reasons to _leak_ the private key all the same:
    /// obfuscating it into a `SecureBuffer` or wrapping it for storage.
    /// The associated-function form forces the call site to spell out
    /// the type name: `SecretKey::leak_into_bytes(key)`.
    #[inline]
    pub unsafe fn leak_into_bytes(Self(bytes): Self) -> [u8; Self::SIZE] {
        bytes
    }
}

/// generate a fresh (secret, public) pair for one-shot use
pub fn generate_ephemeral_keypair<Rng>(rng: Rng) -> (SecretKey, PublicKey)
where
    Rng: RngCore + CryptoRng,
{
    let secret = SecretKey::new(rng);
    let public = secret.public_key();
    (secret, public)
}

impl PublicKey {
    pub const SIZE: usize = 33;
    /// Size of the transient uncompressed SEC1 form.
    pub const UNCOMPRESSED_SIZE: usize = 65;
    /// Leading byte of the uncompressed SEC1 form.
    pub const UNCOMPRESSED_MAGIC: u8 = 0x04;

    /// Rebuild a key from its 33 compressed bytes, validating that the
    /// point is on the curve.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, Error> {
        k256::PublicKey::from_sec1_bytes(&bytes).map_err(|_| Error::InvalidPublicKeyNotOnCurve)?;
        Ok(Self(bytes))
    }

    /// verify the cryptographic [`Signature`] against the `message` and the
    /// [`PublicKey`] `self`.
    pub fn verify<T>(&self, message: T, signature: &Signature) -> bool
    where
        T: AsRef<[u8]>,
    {
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&self.0) else {
            return false;
        };
        let Ok(signature) = k256::ecdsa::Signature::from_slice(&signature.0) else {
            return false;
        };
        verifying_key.verify(message.as_ref(), &signature).is_ok()
    }

    /// The 65-byte uncompressed SEC1 form, `0x04 || x || y`.
    pub fn uncompressed(&self) -> [u8; Self::UNCOMPRESSED_SIZE] {
        let point = k256::PublicKey::from_sec1_bytes(&self.0)
            .expect("validated point")
            .to_encoded_point(false);
        let mut bytes = [0u8; Self::UNCOMPRESSED_SIZE];
        bytes.copy_from_slice(point.as_bytes());
        bytes
    }
}

impl Signature {
    pub const SIZE: usize = 64;
}

impl SharedSecret {
    pub const SIZE: usize = 32;

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }
}

/* Drop ******************************************************************** */

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.scrub()
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.scrub()
    }
}

/* Format ****************************************************************** */

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.as_ref()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.as_ref()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey<secp256k1>")
            .field(&hex::encode(self.as_ref()))
            .finish()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature<secp256k1>")
            .field(&hex::encode(self.as_ref()))
            .finish()
    }
}

/// conveniently provide a proper implementation to debug for the
/// SecretKey when only *testing* the library
#[cfg(test)]
impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey<secp256k1>")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// conveniently provide an incomplete implementation of Debug for the
/// SecretKey.
#[cfg(not(test))]
impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey<secp256k1>").finish_non_exhaustive()
    }
}

/* AsRef ******************************************************************* */

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/* Conversion ************************************************************** */

impl From<PublicKey> for [u8; PublicKey::SIZE] {
    fn from(pk: PublicKey) -> Self {
        pk.0
    }
}

impl From<[u8; Self::SIZE]> for Signature {
    fn from(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<[u8; Self::SIZE]> for SecretKey {
    type Error = Error;
    fn try_from(bytes: [u8; Self::SIZE]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl<'a> TryFrom<&'a [u8]> for PublicKey {
    type Error = Error;
    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; Self::SIZE] = value
            .try_into()
            .map_err(|_| Error::InvalidSize {
                expected: Self::SIZE,
            })?;
        Self::from_bytes(bytes)
    }
}

impl<'a> TryFrom<&'a [u8]> for Signature {
    type Error = Error;
    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; Self::SIZE] = value
            .try_into()
            .map_err(|_| Error::InvalidSize {
                expected: Self::SIZE,
            })?;
        Ok(Self(bytes))
    }
}

impl<'a> TryFrom<&'a [u8]> for SecretKey {
    type Error = Error;
    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; Self::SIZE] = value
            .try_into()
            .map_err(|_| Error::InvalidSize {
                expected: Self::SIZE,
            })?;
        Self::from_bytes(bytes)
    }
}

impl FromStr for PublicKey {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; Self::SIZE];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::InvalidSize {
            expected: Self::SIZE,
        })?;
        Self::from_bytes(bytes)
    }
}

impl FromStr for Signature {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; Self::SIZE];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::InvalidSize {
            expected: Self::SIZE,
        })?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen, TestResult};
    use quickcheck_macros::quickcheck;
    use rand::rngs::OsRng;

    impl Arbitrary for SecretKey {
        fn arbitrary(g: &mut Gen) -> Self {
            // rejection sampling over raw bytes; the group order is
            // close enough to 2^256 that this converges immediately
            loop {
                let mut bytes = [0u8; Self::SIZE];
                bytes.iter_mut().for_each(|byte| {
                    *byte = u8::arbitrary(g);
                });
                if let Ok(key) = SecretKey::from_bytes(bytes) {
                    return key;
                }
            }
        }
    }

    #[quickcheck]
    fn signing_verify_works(signing_key: SecretKey, message: Vec<u8>) -> bool {
        let public_key = signing_key.public_key();
        let signature = signing_key.sign(&message);

        public_key.verify(message, &signature)
    }

    #[quickcheck]
    fn flipped_signature_does_not_verify(
        signing_key: SecretKey,
        message: Vec<u8>,
        byte: usize,
        bit: u8,
    ) -> bool {
        let public_key = signing_key.public_key();
        let signature = signing_key.sign(&message);

        let mut bytes: [u8; Signature::SIZE] = signature.0;
        bytes[byte % Signature::SIZE] ^= 1 << (bit % 8);

        !public_key.verify(message, &Signature(bytes))
    }

    #[quickcheck]
    fn flipped_message_does_not_verify(signing_key: SecretKey, message: Vec<u8>) -> TestResult {
        if message.is_empty() {
            return TestResult::discard();
        }
        let public_key = signing_key.public_key();
        let signature = signing_key.sign(&message);

        let mut tampered = message;
        tampered[0] ^= 0x01;

        TestResult::from_bool(!public_key.verify(tampered, &signature))
    }

    #[quickcheck]
    fn ecdh_is_symmetric(a: SecretKey, b: SecretKey) -> bool {
        let shared_ab = a.ecdh(&b.public_key()).unwrap();
        let shared_ba = b.ecdh(&a.public_key()).unwrap();
        shared_ab.as_bytes() == shared_ba.as_bytes()
    }

    #[test]
    fn public_key_is_compressed() {
        let key = SecretKey::new(OsRng);
        let public = key.public_key();
        assert_eq!(public.as_ref().len(), PublicKey::SIZE);
        assert!(matches!(public.as_ref()[0], 0x02 | 0x03));

        let uncompressed = public.uncompressed();
        assert_eq!(uncompressed[0], PublicKey::UNCOMPRESSED_MAGIC);
    }

    #[test]
    fn off_curve_bytes_are_rejected() {
        let bytes = [0xFFu8; PublicKey::SIZE];
        assert_eq!(
            PublicKey::from_bytes(bytes),
            Err(Error::InvalidPublicKeyNotOnCurve)
        );
    }

    #[test]
    fn zero_scalar_is_rejected() {
        assert_eq!(
            SecretKey::from_bytes([0u8; SecretKey::SIZE]).map(|_| ()),
            Err(Error::InvalidSecretKey)
        );
    }

    #[quickcheck]
    fn public_key_from_str(signing_key: SecretKey) -> bool {
        let public_key = signing_key.public_key();
        let s = public_key.to_string();
        s.parse::<PublicKey>() == Ok(public_key)
    }
}
