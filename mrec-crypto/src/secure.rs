//! Obfuscated in-memory secrets.
//!
//! [`SecureBuffer`] holds a secret XOR-obfuscated under a
//! per-instance key, together with an obfuscated additive checksum of
//! the original bytes. The key is a freshly minted opaque identifier
//! whose bytes serve directly as the key material, so every buffer
//! obfuscates differently. The obfuscation is defense-in-depth
//! against casual inspection of process memory, not a cryptographic
//! guarantee: plaintext exists only inside accessor calls.
//!
//! Disposal is explicit and observable. `dispose()` scrubs every
//! backing buffer and records a backtrace; any later access fails
//! with [`Error::ObjectDisposed`] carrying that backtrace, which
//! makes use-after-dispose deterministic instead of silently reading
//! zeroed memory.

use std::backtrace::Backtrace;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mrec_ident::{GuidV4Provider, IdProvider as _};
use thiserror::Error;

use crate::memsec::{ct_eq, Scrubbed as _};

const OBFUSCATION_KEY_SIZE: usize = GuidV4Provider::SIZE;
const CHECKSUM_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum Error {
    /// The buffer was disposed; the message carries the backtrace of
    /// the original disposal.
    #[error("secure buffer accessed after dispose; disposed at:\n{stack}")]
    ObjectDisposed { stack: String },
    /// The deobfuscated value does not have the recorded length.
    #[error("decrypted value length mismatch")]
    DecryptedValueLengthMismatch,
    /// The deobfuscated value fails its integrity checksum. Also the
    /// normalized form of every unexpected accessor failure, so that
    /// callers cannot distinguish failure causes.
    #[error("decrypted value checksum mismatch")]
    DecryptedValueChecksumMismatch,
}

impl Error {
    pub fn reason_key(&self) -> &'static str {
        match self {
            Error::ObjectDisposed { .. } => "error.secure.objectDisposed",
            Error::DecryptedValueLengthMismatch => "error.secure.lengthMismatch",
            Error::DecryptedValueChecksumMismatch => "error.secure.checksumMismatch",
        }
    }
}

pub struct SecureBuffer {
    obfuscated: Vec<u8>,
    checksum: [u8; CHECKSUM_SIZE],
    key: [u8; OBFUSCATION_KEY_SIZE],
    original_length: usize,
    disposed: bool,
    disposal_stack: Option<String>,
}

/// Mint an opaque identifier and use its bytes as the obfuscation
/// key.
fn fresh_obfuscation_key() -> [u8; OBFUSCATION_KEY_SIZE] {
    let id = GuidV4Provider::new().generate();
    let mut key = [0u8; OBFUSCATION_KEY_SIZE];
    key.copy_from_slice(&id);
    key
}

fn additive_checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let mut sum = 0u32;
    for &byte in data {
        sum = sum.wrapping_add(byte as u32);
    }
    sum.to_be_bytes()
}

impl SecureBuffer {
    /// Take ownership of `data`, obfuscating it in place. The input
    /// vector's original storage is consumed by the buffer.
    pub fn new(mut data: Vec<u8>) -> Self {
        let key = fresh_obfuscation_key();

        let mut checksum = additive_checksum(&data);
        for (i, byte) in checksum.iter_mut().enumerate() {
            *byte ^= key[i % OBFUSCATION_KEY_SIZE];
        }

        let original_length = data.len();
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= key[i % OBFUSCATION_KEY_SIZE];
        }

        Self {
            obfuscated: data,
            checksum,
            key,
            original_length,
            disposed: false,
            disposal_stack: None,
        }
    }

    /// Copy `data` into a new buffer. Prefer [`SecureBuffer::new`]
    /// when the caller can part with its own storage.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    pub fn len(&self) -> usize {
        self.original_length
    }

    pub fn is_empty(&self) -> bool {
        self.original_length == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn guard(&self) -> Result<(), Error> {
        if self.disposed {
            return Err(Error::ObjectDisposed {
                stack: self
                    .disposal_stack
                    .clone()
                    .unwrap_or_else(|| "<no backtrace captured>".into()),
            });
        }
        Ok(())
    }

    /// Deobfuscate and return the secret, verifying length and
    /// checksum.
    pub fn value(&self) -> Result<Vec<u8>, Error> {
        self.guard()?;

        let mut plain = self.obfuscated.clone();
        for (i, byte) in plain.iter_mut().enumerate() {
            *byte ^= self.key[i % OBFUSCATION_KEY_SIZE];
        }

        if plain.len() != self.original_length {
            plain.scrub();
            return Err(Error::DecryptedValueLengthMismatch);
        }

        let mut expected = self.checksum;
        for (i, byte) in expected.iter_mut().enumerate() {
            *byte ^= self.key[i % OBFUSCATION_KEY_SIZE];
        }
        if !ct_eq(&additive_checksum(&plain), &expected) {
            plain.scrub();
            return Err(Error::DecryptedValueChecksumMismatch);
        }

        Ok(plain)
    }

    /// The secret as UTF-8. A non-UTF-8 secret reports the same
    /// checksum error as corruption, by the normalization rule.
    pub fn value_as_string(&self) -> Result<String, Error> {
        let bytes = self.value()?;
        String::from_utf8(bytes).map_err(|_| Error::DecryptedValueChecksumMismatch)
    }

    pub fn value_as_hex(&self) -> Result<String, Error> {
        Ok(hex::encode(self.value()?))
    }

    pub fn value_as_base64(&self) -> Result<String, Error> {
        Ok(BASE64.encode(self.value()?))
    }

    /// Scrub every backing buffer, record the call site, and mark the
    /// buffer disposed. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.obfuscated.scrub();
        self.key.scrub();
        self.checksum.scrub();
        self.original_length.scrub();
        self.disposal_stack = Some(Backtrace::force_capture().to_string());
        self.disposed = true;
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_testing(&mut self) {
        if let Some(byte) = self.obfuscated.first_mut() {
            *byte ^= 0xFF;
        }
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        if !self.disposed {
            self.obfuscated.scrub();
            self.key.scrub();
            self.checksum.scrub();
        }
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("len", &self.original_length)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_plain_bytes() {
        let buffer = SecureBuffer::from_slice(b"attack at dawn");
        assert_eq!(buffer.value().unwrap(), b"attack at dawn");
        assert_eq!(buffer.value_as_string().unwrap(), "attack at dawn");
        assert_eq!(buffer.value_as_hex().unwrap(), hex::encode(b"attack at dawn"));
    }

    #[test]
    fn obfuscated_form_differs_from_plaintext() {
        let buffer = SecureBuffer::from_slice(b"attack at dawn");
        assert_ne!(buffer.obfuscated.as_slice(), b"attack at dawn".as_slice());
    }

    #[test]
    fn empty_sentinel() {
        let buffer = SecureBuffer::new(Vec::new());
        assert!(buffer.is_empty());
        assert_eq!(buffer.value().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn access_after_dispose_fails_with_stack() {
        let mut buffer = SecureBuffer::from_slice(b"secret");
        buffer.dispose();
        assert!(buffer.is_disposed());

        let err = buffer.value().unwrap_err();
        match err {
            Error::ObjectDisposed { ref stack } => assert!(!stack.is_empty()),
            other => panic!("expected ObjectDisposed, got {other:?}"),
        }
        // every accessor is guarded
        assert!(matches!(
            buffer.value_as_string(),
            Err(Error::ObjectDisposed { .. })
        ));
        assert!(matches!(
            buffer.value_as_hex(),
            Err(Error::ObjectDisposed { .. })
        ));
        assert!(matches!(
            buffer.value_as_base64(),
            Err(Error::ObjectDisposed { .. })
        ));
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut buffer = SecureBuffer::from_slice(b"secret");
        buffer.dispose();
        let first = match buffer.value().unwrap_err() {
            Error::ObjectDisposed { stack } => stack,
            other => panic!("expected ObjectDisposed, got {other:?}"),
        };
        buffer.dispose();
        let second = match buffer.value().unwrap_err() {
            Error::ObjectDisposed { stack } => stack,
            other => panic!("expected ObjectDisposed, got {other:?}"),
        };
        assert_eq!(first, second);
    }

    #[test]
    fn corruption_reports_checksum_mismatch() {
        let mut buffer = SecureBuffer::from_slice(b"secret");
        buffer.corrupt_for_testing();
        assert!(matches!(
            buffer.value(),
            Err(Error::DecryptedValueChecksumMismatch)
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_secret_roundtrips(data in proptest::collection::vec(any::<u8>(), 0..512)) {
                let buffer = SecureBuffer::from_slice(&data);
                prop_assert_eq!(buffer.value().unwrap(), data);
            }

            #[test]
            fn any_disposed_buffer_denies_access(data in proptest::collection::vec(any::<u8>(), 0..64)) {
                let mut buffer = SecureBuffer::from_slice(&data);
                buffer.dispose();
                let is_disposed_err = matches!(buffer.value(), Err(Error::ObjectDisposed { .. }));
                prop_assert!(is_disposed_err);
            }
        }
    }

    #[test]
    fn non_utf8_secret_normalizes_to_checksum_error() {
        let buffer = SecureBuffer::from_slice(&[0xFF, 0xFE, 0xFD]);
        assert!(matches!(
            buffer.value_as_string(),
            Err(Error::DecryptedValueChecksumMismatch)
        ));
        // the raw accessor still works
        assert_eq!(buffer.value().unwrap(), vec![0xFF, 0xFE, 0xFD]);
    }
}
