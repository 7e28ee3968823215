//! HMAC-SHA-512 deterministic random bit generator.
//!
//! The update/generate construction of SP 800-90A, without the
//! reseed machinery: the generator is seeded once from an HKDF
//! pseudorandom key and drawn from until its consumer is done. Used
//! to make Paillier prime search a pure function of the seed.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

const OUT_SIZE: usize = 64;

pub struct HmacDrbg {
    key: [u8; OUT_SIZE],
    value: [u8; OUT_SIZE],
}

impl HmacDrbg {
    pub fn new(seed: &[u8]) -> Self {
        let mut drbg = Self {
            key: [0x00; OUT_SIZE],
            value: [0x01; OUT_SIZE],
        };
        drbg.update(Some(seed));
        drbg
    }

    fn mac(key: &[u8], parts: &[&[u8]]) -> [u8; OUT_SIZE] {
        let mut mac = HmacSha512::new_from_slice(key).expect("hmac accepts any key length");
        for part in parts {
            mac.update(part);
        }
        let mut out = [0u8; OUT_SIZE];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    fn update(&mut self, input: Option<&[u8]>) {
        self.key = Self::mac(&self.key, &[&self.value, &[0x00], input.unwrap_or(&[])]);
        self.value = Self::mac(&self.key, &[&self.value]);
        if let Some(input) = input {
            self.key = Self::mac(&self.key, &[&self.value, &[0x01], input]);
            self.value = Self::mac(&self.key, &[&self.value]);
        }
    }

    /// Fill `out` with the next bytes of the stream.
    pub fn generate(&mut self, out: &mut [u8]) {
        let mut filled = 0;
        while filled < out.len() {
            self.value = Self::mac(&self.key, &[&self.value]);
            let take = (out.len() - filled).min(OUT_SIZE);
            out[filled..filled + take].copy_from_slice(&self.value[..take]);
            filled += take;
        }
        self.update(None);
    }

    /// Convenience form of [`generate`](Self::generate) returning a
    /// fresh buffer.
    pub fn generate_vec(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.generate(&mut out);
        out
    }
}
