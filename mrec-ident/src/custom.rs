//! Opaque random identifiers of a caller-chosen byte length.

use rand::RngCore;

use crate::{Error, IdProvider};

/// Provider minting crypto-random ids of `N` bytes, 1 <= N <= 255.
///
/// String form is plain hex.
pub struct CustomIdProvider {
    byte_length: usize,
}

impl CustomIdProvider {
    pub fn new(byte_length: usize) -> Result<Self, Error> {
        if byte_length == 0 || byte_length > 255 {
            return Err(Error::InvalidByteLengthParameter(byte_length));
        }
        Ok(Self { byte_length })
    }
}

impl IdProvider for CustomIdProvider {
    fn byte_length(&self) -> usize {
        self.byte_length
    }

    fn generate(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.byte_length];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes
    }

    fn serialize(&self, bytes: &[u8]) -> Result<String, Error> {
        self.check(bytes)?;
        Ok(hex::encode(bytes))
    }

    fn deserialize(&self, text: &str) -> Result<Vec<u8>, Error> {
        if text.len() != self.byte_length * 2 {
            return Err(Error::InvalidStringLength {
                expected: self.byte_length * 2,
                actual: text.len(),
            });
        }
        hex::decode(text).map_err(|_| Error::InvalidCharacters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_lengths() {
        assert!(matches!(
            CustomIdProvider::new(0),
            Err(Error::InvalidByteLengthParameter(0))
        ));
        assert!(matches!(
            CustomIdProvider::new(256),
            Err(Error::InvalidByteLengthParameter(256))
        ));
        assert!(CustomIdProvider::new(1).is_ok());
        assert!(CustomIdProvider::new(255).is_ok());
    }

    #[test]
    fn hex_roundtrip_at_various_lengths() {
        for n in [1usize, 12, 16, 32, 255] {
            let provider = CustomIdProvider::new(n).unwrap();
            let id = provider.generate();
            assert_eq!(id.len(), n);
            let text = provider.serialize(&id).unwrap();
            assert_eq!(provider.deserialize(&text).unwrap(), id);
        }
    }
}
