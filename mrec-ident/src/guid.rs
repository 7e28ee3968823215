//! 16-byte GUIDv4 identifiers (RFC 4122 random uuids).

use uuid::Uuid;

use crate::{Error, IdProvider};

/// Provider minting random version-4 uuids.
///
/// String form is the 36-character canonical hyphenated rendering.
pub struct GuidV4Provider;

impl GuidV4Provider {
    pub const SIZE: usize = 16;
    const STRING_LENGTH: usize = 36;

    pub fn new() -> Self {
        Self
    }
}

impl Default for GuidV4Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdProvider for GuidV4Provider {
    fn byte_length(&self) -> usize {
        Self::SIZE
    }

    fn generate(&self) -> Vec<u8> {
        Uuid::new_v4().as_bytes().to_vec()
    }

    fn serialize(&self, bytes: &[u8]) -> Result<String, Error> {
        self.check(bytes)?;
        let array: [u8; Self::SIZE] = bytes.try_into().expect("length checked");
        Ok(Uuid::from_bytes(array).hyphenated().to_string())
    }

    fn deserialize(&self, text: &str) -> Result<Vec<u8>, Error> {
        if text.len() != Self::STRING_LENGTH {
            return Err(Error::InvalidStringLength {
                expected: Self::STRING_LENGTH,
                actual: text.len(),
            });
        }
        let uuid = Uuid::try_parse(text).map_err(|_| Error::InvalidCharacters)?;
        Ok(uuid.as_bytes().to_vec())
    }
}
