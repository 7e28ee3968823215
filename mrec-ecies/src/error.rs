//! Codec error taxonomy.
//!
//! Framing and validation failures are typed and stable. Anything
//! cryptographic that goes wrong during decryption is collapsed into
//! the opaque [`EciesError::DecryptionFailed`] before it reaches a
//! caller: the distinguishing detail goes to the debug log only, so
//! error surfaces cannot be used as a decryption oracle.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EciesError {
    // framing
    #[error("frame does not start with the MREC magic")]
    InvalidMagicBytes,
    #[error("unsupported frame version {found:#06x}")]
    UnsupportedVersion { found: u16 },
    #[error("unknown cipher suite or frame mode {found:#04x}")]
    InvalidCipherSuite { found: u8 },
    #[error("frame too short for its header")]
    DataTooShortForHeader,
    #[error("chunk too small to carry its declared content")]
    ChunkTooSmall,
    #[error("chunk {actual} arrived where chunk {expected} was expected")]
    ChunkSequenceError { expected: u32, actual: u32 },
    #[error("recipient is not listed in this chunk")]
    RecipientNotFoundInChunk,

    // validation
    #[error("duplicate recipient id in recipient list")]
    DuplicateRecipientId,
    #[error("recipient count {0} is invalid")]
    InvalidRecipientCount(usize),
    #[error("recipient count {actual} exceeds the maximum of {max}")]
    TooManyRecipients { max: u16, actual: usize },
    #[error("recipient id must be {expected} bytes, got {actual}")]
    InvalidRecipientIdLength { expected: usize, actual: usize },
    #[error("cannot encrypt empty data in this mode")]
    CannotEncryptEmptyData,

    // resource
    #[error("payload does not fit the frame's size fields")]
    ChunkSizeOverflow,
    #[error("source chunk exceeds the maximum chunk size of {max} bytes")]
    BufferOverflow { max: usize },
    #[error("encryption was cancelled")]
    EncryptionCancelled,
    #[error("decryption was cancelled")]
    DecryptionCancelled,

    // crypto, opaque by design
    #[error("decryption failed")]
    DecryptionFailed,
}

impl EciesError {
    /// Stable reason key for the external translation layer.
    pub fn reason_key(&self) -> &'static str {
        match self {
            EciesError::InvalidMagicBytes => "error.ecies.invalidMagicBytes",
            EciesError::UnsupportedVersion { .. } => "error.ecies.unsupportedVersion",
            EciesError::InvalidCipherSuite { .. } => "error.ecies.invalidCipherSuite",
            EciesError::DataTooShortForHeader => "error.ecies.dataTooShortForHeader",
            EciesError::ChunkTooSmall => "error.ecies.chunkTooSmall",
            EciesError::ChunkSequenceError { .. } => "error.ecies.chunkSequenceError",
            EciesError::RecipientNotFoundInChunk => "error.ecies.recipientNotFoundInChunk",
            EciesError::DuplicateRecipientId => "error.ecies.duplicateRecipientId",
            EciesError::InvalidRecipientCount(_) => "error.ecies.invalidRecipientCount",
            EciesError::TooManyRecipients { .. } => "error.ecies.tooManyRecipients",
            EciesError::InvalidRecipientIdLength { .. } => "error.ecies.invalidRecipientIdLength",
            EciesError::CannotEncryptEmptyData => "error.ecies.cannotEncryptEmptyData",
            EciesError::ChunkSizeOverflow => "error.ecies.chunkSizeOverflow",
            EciesError::BufferOverflow { .. } => "error.ecies.bufferOverflow",
            EciesError::EncryptionCancelled => "error.ecies.encryptionCancelled",
            EciesError::DecryptionCancelled => "error.ecies.decryptionCancelled",
            EciesError::DecryptionFailed => "error.ecies.decryptionFailed",
        }
    }

    /// Whether this error may be surfaced from a decrypt entry point
    /// as-is. Everything else normalizes to `DecryptionFailed`.
    pub(crate) fn is_surfaceable(&self) -> bool {
        !matches!(
            self,
            EciesError::DecryptionFailed | EciesError::RecipientNotFoundInChunk
        )
    }
}

/// Collapse a decryption-path failure into the opaque surface error,
/// keeping the real cause in the debug log.
pub(crate) fn normalize_decrypt(err: EciesError) -> EciesError {
    if err.is_surfaceable() {
        err
    } else {
        tracing::debug!(cause = %err, "decryption failure normalized");
        EciesError::DecryptionFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surfaced_messages_carry_no_detail() {
        // the opaque error must not name a cause, key material or
        // plaintext
        let message = EciesError::DecryptionFailed.to_string();
        assert_eq!(message, "decryption failed");
    }

    #[test]
    fn recipient_not_found_normalizes() {
        assert_eq!(
            normalize_decrypt(EciesError::RecipientNotFoundInChunk),
            EciesError::DecryptionFailed
        );
    }

    #[test]
    fn framing_errors_surface_unchanged() {
        assert_eq!(
            normalize_decrypt(EciesError::InvalidMagicBytes),
            EciesError::InvalidMagicBytes
        );
        assert_eq!(
            normalize_decrypt(EciesError::ChunkSequenceError {
                expected: 1,
                actual: 3
            }),
            EciesError::ChunkSequenceError {
                expected: 1,
                actual: 3
            }
        );
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert_eq!(
            normalize_decrypt(EciesError::DecryptionCancelled),
            EciesError::DecryptionCancelled
        );
    }
}
