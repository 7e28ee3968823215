//! The ECIES service: framing-mode encrypt/decrypt entry points.

use std::collections::HashSet;
use std::sync::Arc;

use rand_core::{CryptoRng, RngCore};

use mrec_codec::crc16;
use mrec_codec::length::{decode_length_encoded_data, length_encode_data};
use mrec_crypto::cipher::{self, IV_SIZE, KEY_SIZE, TAG_SIZE};
use mrec_crypto::kdf::derive_key_iv;
use mrec_crypto::key::secp256k1::{generate_ephemeral_keypair, PublicKey, SecretKey};
use mrec_crypto::memsec::Scrubbed as _;

use crate::config::Constants;
use crate::error::{normalize_decrypt, EciesError};
use crate::header::{
    mode, HeaderFlags, MultiRecipientHeader, RecipientEntry, SingleHeader, CRC_SIZE,
    MULTI_HEADER_SIZE, SINGLE_HEADER_SIZE,
};

/// A recipient of a multi-recipient or streamed frame.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: Vec<u8>,
    pub public_key: PublicKey,
}

/// Size of a CEK wrapped under a recipient KEK: the 32 encrypted key
/// bytes plus the GCM tag.
pub(crate) const WRAPPED_KEY_SIZE: usize = KEY_SIZE + TAG_SIZE;

pub struct EciesService {
    constants: Arc<Constants>,
}

impl EciesService {
    pub fn new(constants: Arc<Constants>) -> Self {
        Self { constants }
    }

    /// Service over the built-in default configuration.
    pub fn with_defaults() -> Self {
        Self::new(Constants::default_bundle())
    }

    pub fn constants(&self) -> &Arc<Constants> {
        &self.constants
    }

    /* single recipient **************************************************** */

    /// Encrypt `data` to one recipient in the simple framing mode.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        rng: R,
        recipient: &PublicKey,
        data: &[u8],
    ) -> Result<Vec<u8>, EciesError> {
        self.encrypt_single(rng, recipient, data, mode::SIMPLE)
    }

    /// Simple framing plus a trailing CRC16 over the ciphertext body.
    pub fn encrypt_with_header<R: RngCore + CryptoRng>(
        &self,
        rng: R,
        recipient: &PublicKey,
        data: &[u8],
    ) -> Result<Vec<u8>, EciesError> {
        self.encrypt_single(rng, recipient, data, mode::WITH_HEADER)
    }

    fn encrypt_single<R: RngCore + CryptoRng>(
        &self,
        mut rng: R,
        recipient: &PublicKey,
        data: &[u8],
        frame_mode: u8,
    ) -> Result<Vec<u8>, EciesError> {
        let (ephemeral_secret, ephemeral_public) = generate_ephemeral_keypair(&mut rng);

        // both keys are validated types, agreement cannot fail
        let shared = ephemeral_secret
            .ecdh(recipient)
            .expect("validated key pair");
        let (mut key, iv) = derive_key_iv(shared.as_bytes(), ephemeral_public.as_ref())
            .expect("fixed-size kdf output");

        let mut header = SingleHeader {
            mode: frame_mode,
            ephemeral_public_key: ephemeral_public.into(),
            iv,
            tag: [0u8; TAG_SIZE],
        };
        let (body, tag) = cipher::seal(&key, &iv, &header.aad(), data)
            .map_err(|_| EciesError::DecryptionFailed)?;
        key.scrub();
        header.tag = tag;

        let mut frame = Vec::with_capacity(SINGLE_HEADER_SIZE + body.len() + 11);
        header.write(&mut frame);
        frame.extend_from_slice(&length_encode_data(&body));
        if frame_mode == mode::WITH_HEADER {
            frame.extend_from_slice(&crc16::crc16_bytes(&body));
        }
        Ok(frame)
    }

    /// Decrypt a simple single-recipient frame.
    pub fn decrypt(&self, secret: &SecretKey, frame: &[u8]) -> Result<Vec<u8>, EciesError> {
        self.decrypt_single(secret, frame, mode::SIMPLE)
            .map_err(normalize_decrypt)
    }

    /// Decrypt a single-recipient frame with CRC16 trailer.
    pub fn decrypt_with_header(
        &self,
        secret: &SecretKey,
        frame: &[u8],
    ) -> Result<Vec<u8>, EciesError> {
        self.decrypt_single(secret, frame, mode::WITH_HEADER)
            .map_err(normalize_decrypt)
    }

    fn decrypt_single(
        &self,
        secret: &SecretKey,
        frame: &[u8],
        frame_mode: u8,
    ) -> Result<Vec<u8>, EciesError> {
        let header = SingleHeader::parse(frame, frame_mode)?;

        let decoded = decode_length_encoded_data(&frame[SINGLE_HEADER_SIZE..])
            .map_err(|_| EciesError::ChunkTooSmall)?;
        let body = decoded.data;

        if frame_mode == mode::WITH_HEADER {
            let crc_offset = SINGLE_HEADER_SIZE + decoded.consumed;
            let declared = frame
                .get(crc_offset..crc_offset + CRC_SIZE)
                .ok_or(EciesError::ChunkTooSmall)?;
            if !crc16::verify(body, declared) {
                tracing::debug!("single-recipient frame checksum mismatch");
                return Err(EciesError::DecryptionFailed);
            }
        }

        let ephemeral_public = PublicKey::from_bytes(header.ephemeral_public_key)
            .map_err(|_| EciesError::DecryptionFailed)?;
        let shared = secret
            .ecdh(&ephemeral_public)
            .map_err(|_| EciesError::DecryptionFailed)?;
        let (mut key, _) = derive_key_iv(shared.as_bytes(), ephemeral_public.as_ref())
            .expect("fixed-size kdf output");

        let opened = cipher::open(&key, &header.iv, &header.aad(), body, &header.tag)
            .map_err(|_| EciesError::DecryptionFailed);
        key.scrub();
        opened
    }

    /* multi recipient ***************************************************** */

    /// Encrypt `data` once and wrap the content key for every
    /// recipient.
    pub fn encrypt_multiple<R: RngCore + CryptoRng>(
        &self,
        mut rng: R,
        recipients: &[Recipient],
        data: &[u8],
    ) -> Result<Vec<u8>, EciesError> {
        if data.is_empty() {
            return Err(EciesError::CannotEncryptEmptyData);
        }
        self.validate_recipients(recipients)?;
        if data.len() > u32::MAX as usize {
            return Err(EciesError::ChunkSizeOverflow);
        }

        let (ephemeral_secret, ephemeral_public) = generate_ephemeral_keypair(&mut rng);
        let mut cek = cipher::random_key(&mut rng);
        let iv = cipher::random_iv(&mut rng);

        let header = MultiRecipientHeader {
            recipient_count: recipients.len() as u16,
            chunk_index: 0,
            original_size: data.len() as u32,
            encrypted_size: data.len() as u32,
            flags: HeaderFlags {
                is_last: true,
                has_checksum: true,
            },
            ephemeral_public_key: ephemeral_public.into(),
        };
        let header_bytes = header.to_bytes();

        let (body, tag) =
            cipher::seal(&cek, &iv, &header_bytes, data).map_err(|_| EciesError::DecryptionFailed)?;

        let entries = wrap_cek_for_recipients(&ephemeral_secret, &ephemeral_public, recipients, &cek)?;
        cek.scrub();

        let mut frame = Vec::with_capacity(
            MULTI_HEADER_SIZE
                + entries
                    .iter()
                    .map(|e| e.id.len() + 2 + e.encrypted_key.len())
                    .sum::<usize>()
                + IV_SIZE
                + TAG_SIZE
                + body.len()
                + CRC_SIZE,
        );
        frame.extend_from_slice(&header_bytes);
        crate::header::write_recipient_table(&mut frame, &entries);
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&tag);
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&crc16::crc16_bytes(&body));
        Ok(frame)
    }

    /// Decrypt a multi-recipient frame as the recipient `recipient_id`.
    pub fn decrypt_multiple(
        &self,
        secret: &SecretKey,
        recipient_id: &[u8],
        frame: &[u8],
    ) -> Result<Vec<u8>, EciesError> {
        self.decrypt_multiple_inner(secret, recipient_id, frame)
            .map_err(normalize_decrypt)
    }

    fn decrypt_multiple_inner(
        &self,
        secret: &SecretKey,
        recipient_id: &[u8],
        frame: &[u8],
    ) -> Result<Vec<u8>, EciesError> {
        let id_length = self.constants.member_id_length;
        if recipient_id.len() != id_length {
            return Err(EciesError::InvalidRecipientIdLength {
                expected: id_length,
                actual: recipient_id.len(),
            });
        }

        let header = MultiRecipientHeader::parse(frame)?;
        let (entries, table_size) =
            crate::header::parse_recipient_table(&frame[MULTI_HEADER_SIZE..], header.recipient_count, id_length)?;

        let rest = &frame[MULTI_HEADER_SIZE + table_size..];
        let body_size = header.encrypted_size as usize;
        let trailer = if header.flags.has_checksum { CRC_SIZE } else { 0 };
        if rest.len() != IV_SIZE + TAG_SIZE + body_size + trailer {
            return Err(EciesError::ChunkTooSmall);
        }
        let iv = &rest[..IV_SIZE];
        let tag = &rest[IV_SIZE..IV_SIZE + TAG_SIZE];
        let body = &rest[IV_SIZE + TAG_SIZE..IV_SIZE + TAG_SIZE + body_size];

        if header.flags.has_checksum {
            let declared = &rest[IV_SIZE + TAG_SIZE + body_size..];
            if !crc16::verify(body, declared) {
                tracing::debug!("multi-recipient frame checksum mismatch");
                return Err(EciesError::DecryptionFailed);
            }
        }

        // only the matched entry is ever attempted; scanning every
        // entry with trial decryption would open a timing channel
        let entry = entries
            .iter()
            .find(|entry| entry.id == recipient_id)
            .ok_or(EciesError::RecipientNotFoundInChunk)?;

        let mut cek = unwrap_cek(secret, recipient_id, &header.ephemeral_public_key, entry)?;
        let opened = cipher::open(&cek, iv, &frame[..MULTI_HEADER_SIZE], body, tag)
            .map_err(|_| EciesError::DecryptionFailed);
        cek.scrub();
        opened
    }

    pub(crate) fn validate_recipients(&self, recipients: &[Recipient]) -> Result<(), EciesError> {
        if recipients.is_empty() {
            return Err(EciesError::InvalidRecipientCount(0));
        }
        let max = self.constants.max_recipients;
        if recipients.len() > max as usize {
            return Err(EciesError::TooManyRecipients {
                max,
                actual: recipients.len(),
            });
        }

        let id_length = self.constants.member_id_length;
        let mut seen = HashSet::with_capacity(recipients.len());
        for recipient in recipients {
            if recipient.id.len() != id_length {
                return Err(EciesError::InvalidRecipientIdLength {
                    expected: id_length,
                    actual: recipient.id.len(),
                });
            }
            if !seen.insert(recipient.id.as_slice()) {
                return Err(EciesError::DuplicateRecipientId);
            }
        }
        Ok(())
    }
}

/// Wrap the CEK once per recipient: a per-recipient KEK is derived
/// from ECDH with the ephemeral key and the recipient id is bound as
/// associated data.
pub(crate) fn wrap_cek_for_recipients(
    ephemeral_secret: &SecretKey,
    ephemeral_public: &PublicKey,
    recipients: &[Recipient],
    cek: &[u8; KEY_SIZE],
) -> Result<Vec<RecipientEntry>, EciesError> {
    let mut entries = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let shared = ephemeral_secret
            .ecdh(&recipient.public_key)
            .expect("validated key pair");
        let (mut kek, kek_iv) = derive_key_iv(shared.as_bytes(), ephemeral_public.as_ref())
            .expect("fixed-size kdf output");

        let sealed = cipher::seal(&kek, &kek_iv, &recipient.id, cek);
        kek.scrub();
        let (mut wrapped, tag) = sealed.map_err(|_| EciesError::DecryptionFailed)?;

        wrapped.extend_from_slice(&tag);
        entries.push(RecipientEntry {
            id: recipient.id.clone(),
            encrypted_key: wrapped,
        });
    }
    Ok(entries)
}

/// Recover the CEK from a recipient-table entry.
pub(crate) fn unwrap_cek(
    secret: &SecretKey,
    recipient_id: &[u8],
    ephemeral_public_key: &[u8; PublicKey::SIZE],
    entry: &RecipientEntry,
) -> Result<[u8; KEY_SIZE], EciesError> {
    if entry.encrypted_key.len() != WRAPPED_KEY_SIZE {
        tracing::debug!("wrapped key entry has unexpected size");
        return Err(EciesError::DecryptionFailed);
    }

    let ephemeral_public = PublicKey::from_bytes(*ephemeral_public_key)
        .map_err(|_| EciesError::DecryptionFailed)?;
    let shared = secret
        .ecdh(&ephemeral_public)
        .map_err(|_| EciesError::DecryptionFailed)?;
    let (mut kek, kek_iv) = derive_key_iv(shared.as_bytes(), ephemeral_public.as_ref())
        .expect("fixed-size kdf output");

    let opened = cipher::open(
        &kek,
        &kek_iv,
        recipient_id,
        &entry.encrypted_key[..KEY_SIZE],
        &entry.encrypted_key[KEY_SIZE..],
    );
    kek.scrub();

    let mut plain = opened.map_err(|_| EciesError::DecryptionFailed)?;
    let mut cek = [0u8; KEY_SIZE];
    cek.copy_from_slice(&plain);
    plain.scrub();
    Ok(cek)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn service() -> EciesService {
        EciesService::with_defaults()
    }

    fn recipient(id_byte: u8) -> (SecretKey, Recipient) {
        let secret = SecretKey::new(OsRng);
        let recipient = Recipient {
            id: vec![id_byte; 16],
            public_key: secret.public_key(),
        };
        (secret, recipient)
    }

    #[test]
    fn simple_roundtrip() {
        let service = service();
        let secret = SecretKey::new(OsRng);

        let frame = service
            .encrypt(OsRng, &secret.public_key(), b"hello world")
            .unwrap();
        assert_eq!(service.decrypt(&secret, &frame).unwrap(), b"hello world");
    }

    #[test]
    fn simple_allows_empty_plaintext() {
        let service = service();
        let secret = SecretKey::new(OsRng);

        let frame = service.encrypt(OsRng, &secret.public_key(), b"").unwrap();
        assert_eq!(service.decrypt(&secret, &frame).unwrap(), b"");
    }

    #[test]
    fn with_header_roundtrip_and_crc() {
        let service = service();
        let secret = SecretKey::new(OsRng);

        let frame = service
            .encrypt_with_header(OsRng, &secret.public_key(), b"checked payload")
            .unwrap();
        assert_eq!(
            service.decrypt_with_header(&secret, &frame).unwrap(),
            b"checked payload"
        );

        // corrupt the trailing checksum
        let mut tampered = frame;
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert_eq!(
            service.decrypt_with_header(&secret, &tampered),
            Err(EciesError::DecryptionFailed)
        );
    }

    #[test]
    fn wrong_key_fails_opaquely() {
        let service = service();
        let secret = SecretKey::new(OsRng);
        let other = SecretKey::new(OsRng);

        let frame = service
            .encrypt(OsRng, &secret.public_key(), b"hello world")
            .unwrap();
        assert_eq!(
            service.decrypt(&other, &frame),
            Err(EciesError::DecryptionFailed)
        );
    }

    #[test]
    fn tampered_frame_fails_opaquely() {
        let service = service();
        let secret = SecretKey::new(OsRng);

        let frame = service
            .encrypt(OsRng, &secret.public_key(), b"hello world")
            .unwrap();
        let mut tampered = frame;
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert_eq!(
            service.decrypt(&secret, &tampered),
            Err(EciesError::DecryptionFailed)
        );
    }

    #[test]
    fn framing_errors_stay_typed() {
        let service = service();
        let secret = SecretKey::new(OsRng);

        assert_eq!(
            service.decrypt(&secret, b"XX"),
            Err(EciesError::DataTooShortForHeader)
        );

        let mut frame = service
            .encrypt(OsRng, &secret.public_key(), b"hello")
            .unwrap();
        frame[0] = b'X';
        assert_eq!(
            service.decrypt(&secret, &frame),
            Err(EciesError::InvalidMagicBytes)
        );
    }

    #[test]
    fn multi_recipient_roundtrip() {
        let service = service();
        let parties: Vec<_> = (1u8..=3).map(recipient).collect();
        let recipients: Vec<_> = parties.iter().map(|(_, r)| r.clone()).collect();

        let frame = service
            .encrypt_multiple(OsRng, &recipients, b"secret")
            .unwrap();

        for (secret, recipient) in &parties {
            assert_eq!(
                service
                    .decrypt_multiple(secret, &recipient.id, &frame)
                    .unwrap(),
                b"secret"
            );
        }
    }

    #[test]
    fn unlisted_recipient_fails_opaquely() {
        let service = service();
        let parties: Vec<_> = (1u8..=3).map(recipient).collect();
        let recipients: Vec<_> = parties.iter().map(|(_, r)| r.clone()).collect();
        let frame = service
            .encrypt_multiple(OsRng, &recipients, b"secret")
            .unwrap();

        let (outsider_secret, outsider) = recipient(9);
        assert_eq!(
            service.decrypt_multiple(&outsider_secret, &outsider.id, &frame),
            Err(EciesError::DecryptionFailed)
        );
    }

    #[test]
    fn duplicate_recipients_are_rejected() {
        let service = service();
        let (_, a) = recipient(1);
        let duplicate = a.clone();
        assert_eq!(
            service.encrypt_multiple(OsRng, &[a, duplicate], b"secret"),
            Err(EciesError::DuplicateRecipientId)
        );
    }

    #[test]
    fn empty_payload_is_rejected_in_multi_mode() {
        let service = service();
        let (_, a) = recipient(1);
        assert_eq!(
            service.encrypt_multiple(OsRng, &[a], b""),
            Err(EciesError::CannotEncryptEmptyData)
        );
    }

    #[test]
    fn empty_recipient_list_is_rejected() {
        let service = service();
        assert_eq!(
            service.encrypt_multiple(OsRng, &[], b"secret"),
            Err(EciesError::InvalidRecipientCount(0))
        );
    }

    #[test]
    fn wrong_id_length_is_rejected() {
        let service = service();
        let secret = SecretKey::new(OsRng);
        let bad = Recipient {
            id: vec![1u8; 5],
            public_key: secret.public_key(),
        };
        assert!(matches!(
            service.encrypt_multiple(OsRng, &[bad], b"secret"),
            Err(EciesError::InvalidRecipientIdLength { expected: 16, actual: 5 })
        ));
    }

    #[test]
    fn recipient_order_is_preserved() {
        let service = service();
        let parties: Vec<_> = (1u8..=4).map(recipient).collect();
        let recipients: Vec<_> = parties.iter().map(|(_, r)| r.clone()).collect();
        let frame = service
            .encrypt_multiple(OsRng, &recipients, b"ordered")
            .unwrap();

        let header = MultiRecipientHeader::parse(&frame).unwrap();
        let (entries, _) = crate::header::parse_recipient_table(
            &frame[MULTI_HEADER_SIZE..],
            header.recipient_count,
            16,
        )
        .unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
        let expected: Vec<_> = recipients.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, expected);
    }
}
