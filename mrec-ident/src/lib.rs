//! Pluggable opaque identifiers.
//!
//! Services mint entity ids through an [`IdProvider`] so that the id
//! scheme is a deployment choice, not a hard-coded format. Three
//! providers ship with the crate: [`ObjectIdProvider`] (12-byte
//! MongoDB-style ids), [`GuidV4Provider`] (16-byte RFC 4122 random
//! uuids) and [`CustomIdProvider`] (opaque random ids of any length
//! from 1 to 255 bytes).

use thiserror::Error;

pub mod custom;
pub mod guid;
pub mod object_id;

pub use custom::CustomIdProvider;
pub use guid::GuidV4Provider;
pub use object_id::{ObjectId, ObjectIdProvider};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A byte-form id has the wrong length for this provider.
    #[error("identifier must be exactly {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    /// A string-form id contains characters outside the provider's
    /// alphabet.
    #[error("identifier string contains invalid characters")]
    InvalidCharacters,
    /// A string-form id has the wrong length for this provider.
    #[error("identifier string must be {expected} characters, got {actual}")]
    InvalidStringLength { expected: usize, actual: usize },
    /// A custom provider was configured with an unusable byte length.
    #[error("identifier byte length must be between 1 and 255, got {0}")]
    InvalidByteLengthParameter(usize),
}

impl Error {
    /// Stable reason key for the external translation layer.
    pub fn reason_key(&self) -> &'static str {
        match self {
            Error::InvalidLength { .. } => "error.id.invalidLength",
            Error::InvalidCharacters => "error.id.invalidCharacters",
            Error::InvalidStringLength { .. } => "error.id.invalidStringLength",
            Error::InvalidByteLengthParameter(_) => "error.id.invalidByteLengthParameter",
        }
    }
}

/// Mints and transcodes opaque entity identifiers of a fixed byte
/// length.
///
/// Implementations must be object safe: services hold a
/// `Arc<dyn IdProvider>` chosen at configuration time.
pub trait IdProvider: Send + Sync {
    /// Byte length of every id this provider emits.
    fn byte_length(&self) -> usize;

    /// Mint a fresh id in canonical byte form.
    fn generate(&self) -> Vec<u8>;

    /// Render a byte-form id in this provider's string form.
    fn serialize(&self, bytes: &[u8]) -> Result<String, Error>;

    /// Parse this provider's string form back into canonical bytes.
    fn deserialize(&self, text: &str) -> Result<Vec<u8>, Error>;

    /// Check that `bytes` is a well-formed id for this provider.
    fn check(&self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() != self.byte_length() {
            return Err(Error::InvalidLength {
                expected: self.byte_length(),
                actual: bytes.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn providers() -> Vec<Box<dyn IdProvider>> {
        vec![
            Box::new(ObjectIdProvider::new()),
            Box::new(GuidV4Provider::new()),
            Box::new(CustomIdProvider::new(7).unwrap()),
        ]
    }

    #[test]
    fn generate_matches_declared_length() {
        for p in providers() {
            assert_eq!(p.generate().len(), p.byte_length());
        }
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        for p in providers() {
            let id = p.generate();
            let text = p.serialize(&id).unwrap();
            let back = p.deserialize(&text).unwrap();
            assert_eq!(back, id);
            assert_eq!(back.len(), p.byte_length());
        }
    }

    #[test]
    fn serialize_rejects_wrong_length() {
        for p in providers() {
            let err = p.serialize(&[0u8; 300]).unwrap_err();
            assert!(matches!(err, Error::InvalidLength { .. }));
        }
    }

    #[test]
    fn generated_ids_are_distinct() {
        for p in providers() {
            assert_ne!(p.generate(), p.generate());
        }
    }
}
