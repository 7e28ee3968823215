//! 12-byte ObjectID identifiers.
//!
//! Layout follows the MongoDB ObjectID convention: a 4-byte big-endian
//! unix timestamp, a 5-byte per-process random value, and a 3-byte
//! big-endian counter seeded randomly at startup.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::{Error, IdProvider};

/// A 12-byte ObjectID.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; Self::SIZE]);

impl ObjectId {
    pub const SIZE: usize = 12;

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        self.0
    }

    /// Creation time recorded in the id, as unix seconds.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObjectId").field(&hex::encode(self.0)).finish()
    }
}

impl std::str::FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::SIZE * 2 {
            return Err(Error::InvalidStringLength {
                expected: Self::SIZE * 2,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; Self::SIZE];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::InvalidCharacters)?;
        Ok(Self(bytes))
    }
}

/// Provider minting [`ObjectId`]s.
pub struct ObjectIdProvider {
    process_random: [u8; 5],
    counter: AtomicU32,
}

impl ObjectIdProvider {
    pub fn new() -> Self {
        let mut rng = rand::rngs::OsRng;
        let mut process_random = [0u8; 5];
        rng.fill_bytes(&mut process_random);
        Self {
            process_random,
            counter: AtomicU32::new(rng.next_u32() & 0x00FF_FFFF),
        }
    }

    fn next(&self) -> ObjectId {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let count = self.counter.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; ObjectId::SIZE];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.process_random);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..]);
        ObjectId(bytes)
    }
}

impl Default for ObjectIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdProvider for ObjectIdProvider {
    fn byte_length(&self) -> usize {
        ObjectId::SIZE
    }

    fn generate(&self) -> Vec<u8> {
        self.next().to_bytes().to_vec()
    }

    fn serialize(&self, bytes: &[u8]) -> Result<String, Error> {
        self.check(bytes)?;
        Ok(hex::encode(bytes))
    }

    fn deserialize(&self, text: &str) -> Result<Vec<u8>, Error> {
        let id: ObjectId = text.parse()?;
        Ok(id.to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_form_is_24_hex_chars() {
        let provider = ObjectIdProvider::new();
        let id = provider.generate();
        let text = provider.serialize(&id).unwrap();
        assert_eq!(text.len(), 24);
        assert!(text.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn counter_increments_between_ids() {
        let provider = ObjectIdProvider::new();
        let a = provider.next();
        let b = provider.next();
        let counter = |id: ObjectId| {
            let bytes = id.to_bytes();
            u32::from_be_bytes([0, bytes[9], bytes[10], bytes[11]])
        };
        assert_eq!(counter(b), (counter(a) + 1) & 0x00FF_FFFF);
    }

    #[test]
    fn timestamp_is_recent() {
        let provider = ObjectIdProvider::new();
        let id = provider.next();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;
        assert!(now - id.timestamp() < 5);
    }

    #[test]
    fn deserialize_rejects_bad_input() {
        let provider = ObjectIdProvider::new();
        assert!(matches!(
            provider.deserialize("abc"),
            Err(Error::InvalidStringLength { .. })
        ));
        assert!(matches!(
            provider.deserialize("zzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(Error::InvalidCharacters)
        ));
    }
}
