//! Chunked streaming encryption and decryption.
//!
//! Both directions are pull-based iterators: the encrypting side
//! adapts a source of plaintext chunks into framed ciphertext pieces
//! (stream header first, then one frame per chunk), the decrypting
//! side accumulates arbitrary byte pieces and yields plaintext chunks
//! as soon as whole frames are available, so the two ends do not need
//! to agree on transport chunking.
//!
//! The CEK is wrapped once per stream in the header's recipient
//! table, not per chunk. A cancel token is polled at every chunk
//! boundary; after cancellation no further frame is yielded.

use rand_core::{CryptoRng, RngCore};

use mrec_codec::crc16;
use mrec_crypto::cipher::{self, IV_SIZE, KEY_SIZE, TAG_SIZE};
use mrec_crypto::key::secp256k1::{generate_ephemeral_keypair, SecretKey};
use mrec_crypto::memsec::Scrubbed as _;
use mrec_crypto::CancelToken;

use crate::error::{normalize_decrypt, EciesError};
use crate::header::{HeaderFlags, StreamHeader, CRC_SIZE, MAGIC, VERSION};
use crate::service::{unwrap_cek, wrap_cek_for_recipients, EciesService, Recipient};

/// Byte counts reported at each chunk boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub bytes_processed: u64,
    pub chunks_processed: u32,
}

type ProgressHook = Box<dyn FnMut(&Progress) + Send>;

/// Streaming options. `chunk_size` only affects helpers that chunk a
/// contiguous buffer; sources that produce their own chunks are
/// bounded by the configured maximum instead.
#[derive(Default)]
pub struct StreamOptions {
    pub chunk_size: Option<usize>,
    pub with_checksum: bool,
    pub cancel: Option<CancelToken>,
    pub on_progress: Option<ProgressHook>,
}

impl std::fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOptions")
            .field("chunk_size", &self.chunk_size)
            .field("with_checksum", &self.with_checksum)
            .field("cancelled", &self.cancel.as_ref().map(CancelToken::is_cancelled))
            .field("has_progress_hook", &self.on_progress.is_some())
            .finish()
    }
}

/// Split a contiguous buffer into owned chunks of at most
/// `chunk_size` bytes.
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> impl Iterator<Item = Vec<u8>> + '_ {
    data.chunks(chunk_size.max(1)).map(<[u8]>::to_vec)
}

const CHUNK_PREFIX_SIZE: usize = 4 + 4;

/// Associated data binding a chunk to the stream format and its
/// position.
fn chunk_aad(index: u32) -> [u8; 10] {
    let mut aad = [0u8; 10];
    aad[..4].copy_from_slice(&MAGIC);
    aad[4..6].copy_from_slice(&VERSION.to_be_bytes());
    aad[6..].copy_from_slice(&index.to_be_bytes());
    aad
}

/* Encryption ************************************************************** */

pub struct EncryptionStream<S> {
    source: S,
    cek: [u8; KEY_SIZE],
    pending_header: Option<Vec<u8>>,
    next_index: u32,
    chunk_size_max: usize,
    with_checksum: bool,
    cancel: Option<CancelToken>,
    on_progress: Option<ProgressHook>,
    progress: Progress,
    finished: bool,
}

impl<S> EncryptionStream<S>
where
    S: Iterator<Item = Vec<u8>>,
{
    pub fn new<R: RngCore + CryptoRng>(
        service: &EciesService,
        mut rng: R,
        recipients: &[Recipient],
        source: S,
        options: StreamOptions,
    ) -> Result<Self, EciesError> {
        service.validate_recipients(recipients)?;

        let (ephemeral_secret, ephemeral_public) = generate_ephemeral_keypair(&mut rng);
        let cek = cipher::random_key(&mut rng);
        let entries =
            wrap_cek_for_recipients(&ephemeral_secret, &ephemeral_public, recipients, &cek)?;

        let header = StreamHeader {
            flags: HeaderFlags {
                is_last: false,
                has_checksum: options.with_checksum,
            },
            ephemeral_public_key: ephemeral_public.into(),
            recipients: entries,
        };

        Ok(Self {
            source,
            cek,
            pending_header: Some(header.to_bytes()),
            next_index: 0,
            chunk_size_max: service.constants().chunk_size_max,
            with_checksum: options.with_checksum,
            cancel: options.cancel,
            on_progress: options.on_progress,
            progress: Progress::default(),
            finished: false,
        })
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    fn finish(&mut self) {
        self.cek.scrub();
        self.finished = true;
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(CancelToken::is_cancelled)
            .unwrap_or(false)
    }
}

impl<S> Iterator for EncryptionStream<S>
where
    S: Iterator<Item = Vec<u8>>,
{
    type Item = Result<Vec<u8>, EciesError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(header) = self.pending_header.take() {
            return Some(Ok(header));
        }
        if self.is_cancelled() {
            self.finish();
            return Some(Err(EciesError::EncryptionCancelled));
        }

        let mut chunk = match self.source.next() {
            Some(chunk) => chunk,
            None => {
                self.finish();
                return None;
            }
        };
        if chunk.len() > self.chunk_size_max {
            self.finish();
            return Some(Err(EciesError::BufferOverflow {
                max: self.chunk_size_max,
            }));
        }

        let index = self.next_index;
        let iv = cipher::random_iv(rand::rngs::OsRng);
        let sealed = cipher::seal(&self.cek, &iv, &chunk_aad(index), &chunk);
        chunk.scrub();
        let (body, tag) = match sealed {
            Ok(sealed) => sealed,
            Err(_) => {
                self.finish();
                return Some(Err(EciesError::DecryptionFailed));
            }
        };

        let trailer = if self.with_checksum { CRC_SIZE } else { 0 };
        let mut frame =
            Vec::with_capacity(CHUNK_PREFIX_SIZE + IV_SIZE + TAG_SIZE + body.len() + trailer);
        frame.extend_from_slice(&index.to_be_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&tag);
        frame.extend_from_slice(&body);
        if self.with_checksum {
            frame.extend_from_slice(&crc16::crc16_bytes(&body));
        }

        self.next_index += 1;
        self.progress.bytes_processed += body.len() as u64;
        self.progress.chunks_processed += 1;
        if let Some(hook) = &mut self.on_progress {
            hook(&self.progress);
        }
        tracing::trace!(index, size = body.len(), "stream chunk sealed");

        Some(Ok(frame))
    }
}

impl<S> Drop for EncryptionStream<S> {
    fn drop(&mut self) {
        self.cek.scrub();
    }
}

/* Decryption ************************************************************** */

enum DecryptState {
    Header,
    Body {
        cek: [u8; KEY_SIZE],
        has_checksum: bool,
        next_index: u32,
    },
}

pub struct DecryptionStream<S> {
    source: S,
    secret: SecretKey,
    recipient_id: Vec<u8>,
    id_length: usize,
    chunk_size_max: usize,
    buffer: Vec<u8>,
    state: DecryptState,
    cancel: Option<CancelToken>,
    on_progress: Option<ProgressHook>,
    progress: Progress,
    finished: bool,
}

impl<S> DecryptionStream<S>
where
    S: Iterator<Item = Vec<u8>>,
{
    pub fn new(
        service: &EciesService,
        secret: SecretKey,
        recipient_id: Vec<u8>,
        source: S,
        options: StreamOptions,
    ) -> Result<Self, EciesError> {
        let id_length = service.constants().member_id_length;
        if recipient_id.len() != id_length {
            return Err(EciesError::InvalidRecipientIdLength {
                expected: id_length,
                actual: recipient_id.len(),
            });
        }

        Ok(Self {
            source,
            secret,
            recipient_id,
            id_length,
            chunk_size_max: service.constants().chunk_size_max,
            buffer: Vec::new(),
            state: DecryptState::Header,
            cancel: options.cancel,
            on_progress: options.on_progress,
            progress: Progress::default(),
            finished: false,
        })
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    fn finish(&mut self) {
        if let DecryptState::Body { cek, .. } = &mut self.state {
            cek.scrub();
        }
        self.buffer.scrub();
        self.buffer = Vec::new();
        self.finished = true;
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(CancelToken::is_cancelled)
            .unwrap_or(false)
    }

    /// Try to take one whole frame off the buffer. `Ok(None)` means
    /// more bytes are needed.
    fn take_parsed(&mut self) -> Result<Option<Vec<u8>>, EciesError> {
        match self.state {
            DecryptState::Header => {
                let Some((header, consumed)) =
                    StreamHeader::try_parse(&self.buffer, self.id_length)?
                else {
                    return Ok(None);
                };
                self.buffer.drain(..consumed);

                let entry = header
                    .recipients
                    .iter()
                    .find(|entry| entry.id == self.recipient_id)
                    .ok_or(EciesError::RecipientNotFoundInChunk)?;
                let cek = unwrap_cek(
                    &self.secret,
                    &self.recipient_id,
                    &header.ephemeral_public_key,
                    entry,
                )?;

                self.state = DecryptState::Body {
                    cek,
                    has_checksum: header.flags.has_checksum,
                    next_index: 0,
                };
                // no plaintext from the header, caller loops again
                self.take_parsed()
            }
            DecryptState::Body {
                cek,
                has_checksum,
                ref mut next_index,
            } => {
                if self.buffer.len() < CHUNK_PREFIX_SIZE {
                    return Ok(None);
                }
                let index = u32::from_be_bytes(
                    self.buffer[..4].try_into().expect("sized"),
                );
                let body_size = u32::from_be_bytes(
                    self.buffer[4..8].try_into().expect("sized"),
                ) as usize;
                if body_size > self.chunk_size_max {
                    return Err(EciesError::BufferOverflow {
                        max: self.chunk_size_max,
                    });
                }

                let trailer = if has_checksum { CRC_SIZE } else { 0 };
                let total = CHUNK_PREFIX_SIZE + IV_SIZE + TAG_SIZE + body_size + trailer;
                if self.buffer.len() < total {
                    return Ok(None);
                }

                let expected = *next_index;
                if index != expected {
                    return Err(EciesError::ChunkSequenceError {
                        expected,
                        actual: index,
                    });
                }

                let iv = &self.buffer[CHUNK_PREFIX_SIZE..CHUNK_PREFIX_SIZE + IV_SIZE];
                let tag = &self.buffer
                    [CHUNK_PREFIX_SIZE + IV_SIZE..CHUNK_PREFIX_SIZE + IV_SIZE + TAG_SIZE];
                let body_start = CHUNK_PREFIX_SIZE + IV_SIZE + TAG_SIZE;
                let body = &self.buffer[body_start..body_start + body_size];

                if has_checksum {
                    let declared = &self.buffer[body_start + body_size..total];
                    if !crc16::verify(body, declared) {
                        tracing::debug!(index, "stream chunk checksum mismatch");
                        return Err(EciesError::DecryptionFailed);
                    }
                }

                let plain = cipher::open(&cek, iv, &chunk_aad(index), body, tag)
                    .map_err(|_| EciesError::DecryptionFailed)?;

                *next_index += 1;
                self.buffer.drain(..total);
                self.progress.bytes_processed += plain.len() as u64;
                self.progress.chunks_processed += 1;
                if let Some(hook) = &mut self.on_progress {
                    hook(&self.progress);
                }
                tracing::trace!(index, size = plain.len(), "stream chunk opened");

                Ok(Some(plain))
            }
        }
    }
}

impl<S> Iterator for DecryptionStream<S>
where
    S: Iterator<Item = Vec<u8>>,
{
    type Item = Result<Vec<u8>, EciesError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.is_cancelled() {
            self.finish();
            return Some(Err(EciesError::DecryptionCancelled));
        }

        loop {
            match self.take_parsed() {
                Ok(Some(plain)) => return Some(Ok(plain)),
                Ok(None) => {}
                Err(err) => {
                    self.finish();
                    return Some(Err(normalize_decrypt(err)));
                }
            }

            match self.source.next() {
                Some(bytes) => self.buffer.extend_from_slice(&bytes),
                None => {
                    let leftover = !self.buffer.is_empty();
                    let mid_header = matches!(self.state, DecryptState::Header);
                    self.finish();
                    return if leftover || mid_header {
                        // the stream ended inside a frame (or before
                        // any header arrived)
                        Some(Err(if mid_header {
                            EciesError::DataTooShortForHeader
                        } else {
                            EciesError::ChunkTooSmall
                        }))
                    } else {
                        None
                    };
                }
            }
        }
    }
}

impl<S> Drop for DecryptionStream<S> {
    fn drop(&mut self) {
        if let DecryptState::Body { cek, .. } = &mut self.state {
            cek.scrub();
        }
        self.buffer.scrub();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn service() -> EciesService {
        EciesService::with_defaults()
    }

    fn recipient() -> (SecretKey, Recipient) {
        let secret = SecretKey::new(OsRng);
        let recipient = Recipient {
            id: vec![7u8; 16],
            public_key: secret.public_key(),
        };
        (secret, recipient)
    }

    fn encrypt_all(
        service: &EciesService,
        recipients: &[Recipient],
        data: &[u8],
        options: StreamOptions,
    ) -> Vec<Vec<u8>> {
        EncryptionStream::new(
            service,
            OsRng,
            recipients,
            chunk_bytes(data, 1024),
            options,
        )
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
    }

    #[test]
    fn roundtrip_across_chunk_boundaries() {
        let service = service();
        let (secret, recipient) = recipient();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let frames = encrypt_all(
            &service,
            &[recipient.clone()],
            &data,
            StreamOptions {
                with_checksum: true,
                ..Default::default()
            },
        );

        // re-split the ciphertext on foreign boundaries to prove the
        // decrypter does not depend on transport chunking
        let joined: Vec<u8> = frames.concat();
        let resplit = chunk_bytes(&joined, 333);

        let decrypted: Vec<u8> = DecryptionStream::new(
            &service,
            secret,
            recipient.id,
            resplit,
            StreamOptions::default(),
        )
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
        .concat();

        assert_eq!(decrypted, data);
    }

    #[test]
    fn empty_source_yields_header_only() {
        let service = service();
        let (secret, recipient) = recipient();

        let frames = encrypt_all(
            &service,
            &[recipient.clone()],
            b"",
            StreamOptions::default(),
        );
        assert_eq!(frames.len(), 1);

        let decrypted: Vec<Vec<u8>> = DecryptionStream::new(
            &service,
            secret,
            recipient.id,
            frames.into_iter(),
            StreamOptions::default(),
        )
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn progress_is_reported_at_chunk_boundaries() {
        let service = service();
        let (_, recipient) = recipient();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_hook = Arc::clone(&calls);

        let data = vec![0xA5u8; 4096];
        let frames = encrypt_all(
            &service,
            &[recipient],
            &data,
            StreamOptions {
                on_progress: Some(Box::new(move |progress| {
                    calls_in_hook.fetch_add(1, Ordering::Relaxed);
                    assert!(progress.bytes_processed > 0);
                })),
                ..Default::default()
            },
        );

        // header frame + 4 chunks of 1024
        assert_eq!(frames.len(), 5);
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn cancellation_stops_encryption_mid_stream() {
        let service = service();
        let (_, recipient) = recipient();
        let token = CancelToken::new();

        // flag flips at the chunk boundary after the second chunk
        let hook_token = token.clone();
        let on_progress: ProgressHook = Box::new(move |progress: &Progress| {
            if progress.chunks_processed == 2 {
                hook_token.cancel();
            }
        });

        let source = std::iter::repeat_with(|| vec![1u8; 128]).take(4);
        let mut stream = EncryptionStream::new(
            &service,
            OsRng,
            &[recipient],
            source,
            StreamOptions {
                cancel: Some(token),
                on_progress: Some(on_progress),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(stream.next().unwrap().is_ok()); // header
        assert!(stream.next().unwrap().is_ok()); // chunk 0
        assert!(stream.next().unwrap().is_ok()); // chunk 1
        assert_eq!(
            stream.next().unwrap(),
            Err(EciesError::EncryptionCancelled)
        );
        assert!(stream.next().is_none());
    }

    #[test]
    fn cancellation_surfaces_on_decryption() {
        let service = service();
        let (secret, recipient) = recipient();
        let frames = encrypt_all(
            &service,
            &[recipient.clone()],
            &vec![9u8; 3000],
            StreamOptions::default(),
        );

        let token = CancelToken::new();
        token.cancel();
        let mut stream = DecryptionStream::new(
            &service,
            secret,
            recipient.id,
            frames.into_iter(),
            StreamOptions {
                cancel: Some(token),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            stream.next().unwrap(),
            Err(EciesError::DecryptionCancelled)
        );
        assert!(stream.next().is_none());
    }

    #[test]
    fn out_of_order_chunks_are_rejected() {
        let service = service();
        let (secret, recipient) = recipient();
        let mut frames = encrypt_all(
            &service,
            &[recipient.clone()],
            &vec![3u8; 3000],
            StreamOptions::default(),
        );
        // swap the two payload chunks behind the header
        frames.swap(1, 2);

        let result: Result<Vec<_>, _> = DecryptionStream::new(
            &service,
            secret,
            recipient.id,
            frames.into_iter(),
            StreamOptions::default(),
        )
        .unwrap()
        .collect();
        assert_eq!(
            result,
            Err(EciesError::ChunkSequenceError {
                expected: 0,
                actual: 1
            })
        );
    }

    #[test]
    fn oversized_source_chunk_is_rejected() {
        let service = service();
        let (_, recipient) = recipient();
        let max = service.constants().chunk_size_max;

        let source = std::iter::once(vec![0u8; max + 1]);
        let mut stream = EncryptionStream::new(
            &service,
            OsRng,
            &[recipient],
            source,
            StreamOptions::default(),
        )
        .unwrap();

        assert!(stream.next().unwrap().is_ok()); // header
        assert_eq!(stream.next().unwrap(), Err(EciesError::BufferOverflow { max }));
        assert!(stream.next().is_none());
    }

    #[test]
    fn truncated_stream_is_detected() {
        let service = service();
        let (secret, recipient) = recipient();
        let frames = encrypt_all(
            &service,
            &[recipient.clone()],
            &vec![4u8; 2048],
            StreamOptions::default(),
        );

        let mut joined: Vec<u8> = frames.concat();
        joined.truncate(joined.len() - 5);

        let result: Result<Vec<_>, _> = DecryptionStream::new(
            &service,
            secret,
            recipient.id,
            std::iter::once(joined),
            StreamOptions::default(),
        )
        .unwrap()
        .collect();
        assert_eq!(result, Err(EciesError::ChunkTooSmall));
    }

    #[test]
    fn foreign_recipient_fails_opaquely() {
        let service = service();
        let (_, recipient) = recipient();
        let frames = encrypt_all(
            &service,
            &[recipient],
            &vec![5u8; 100],
            StreamOptions::default(),
        );

        let outsider = SecretKey::new(OsRng);
        let result: Result<Vec<_>, _> = DecryptionStream::new(
            &service,
            outsider,
            vec![8u8; 16],
            frames.into_iter(),
            StreamOptions::default(),
        )
        .unwrap()
        .collect();
        assert_eq!(result, Err(EciesError::DecryptionFailed));
    }
}
