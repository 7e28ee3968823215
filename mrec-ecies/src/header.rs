//! Frame headers.
//!
//! Every frame opens with the `MREC` magic and a big-endian version.
//! Single-recipient and stream frames carry a mode byte next; the
//! multi-recipient frame is identified by its fixed 64-byte v2 header
//! whose layout leaves no room for one.
//!
//! Multi-recipient v2 header layout:
//!
//! ```text
//! 0..4    magic        "MREC"
//! 4..6    version      0x0002 BE
//! 6..8    recipientCount U16 BE
//! 8..12   chunkIndex   U32 BE
//! 12..16  originalSize U32 BE
//! 16..20  encryptedSize U32 BE
//! 20      flags        bit0 isLast, bit1 hasChecksum
//! 21..54  ephemeralPublicKey (33 B)
//! 54..64  reserved (zero)
//! ```

use mrec_crypto::key::secp256k1::PublicKey;

use crate::error::EciesError;

pub const MAGIC: [u8; 4] = *b"MREC";
pub const VERSION: u16 = 0x0002;

/// Total size of the fixed multi-recipient header.
pub const MULTI_HEADER_SIZE: usize = 64;
/// Size of the fixed part of a single-recipient header:
/// magic, then version, then mode, then ephemeral pub, then IV, then tag.
pub const SINGLE_HEADER_SIZE: usize = 4 + 2 + 1 + PublicKey::SIZE + IV_SIZE + TAG_SIZE;

pub const IV_SIZE: usize = mrec_crypto::cipher::IV_SIZE;
pub const TAG_SIZE: usize = mrec_crypto::cipher::TAG_SIZE;
pub const CRC_SIZE: usize = 2;

/// Frame mode discriminators.
pub mod mode {
    /// Single recipient, length-prefixed body.
    pub const SIMPLE: u8 = 0x01;
    /// Single recipient with trailing CRC16.
    pub const WITH_HEADER: u8 = 0x02;
    /// Stream header followed by chunk frames.
    pub const STREAM: u8 = 0x04;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags {
    pub is_last: bool,
    pub has_checksum: bool,
}

impl HeaderFlags {
    pub fn to_byte(self) -> u8 {
        (self.is_last as u8) | ((self.has_checksum as u8) << 1)
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            is_last: byte & 0b01 != 0,
            has_checksum: byte & 0b10 != 0,
        }
    }
}

/// Validate the shared magic + version prefix, returning the number
/// of bytes it occupies.
pub fn check_preamble(buf: &[u8]) -> Result<usize, EciesError> {
    if buf.len() < 6 {
        return Err(EciesError::DataTooShortForHeader);
    }
    if buf[..4] != MAGIC {
        return Err(EciesError::InvalidMagicBytes);
    }
    let version = u16::from_be_bytes([buf[4], buf[5]]);
    if version != VERSION {
        return Err(EciesError::UnsupportedVersion { found: version });
    }
    Ok(6)
}

/* Single-recipient ******************************************************** */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleHeader {
    pub mode: u8,
    pub ephemeral_public_key: [u8; PublicKey::SIZE],
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
}

impl SingleHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.push(self.mode);
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
    }

    pub fn parse(buf: &[u8], expected_mode: u8) -> Result<Self, EciesError> {
        let mut offset = check_preamble(buf)?;
        if buf.len() < SINGLE_HEADER_SIZE {
            return Err(EciesError::DataTooShortForHeader);
        }

        let mode = buf[offset];
        if mode != expected_mode {
            return Err(EciesError::InvalidCipherSuite { found: mode });
        }
        offset += 1;

        let mut ephemeral_public_key = [0u8; PublicKey::SIZE];
        ephemeral_public_key.copy_from_slice(&buf[offset..offset + PublicKey::SIZE]);
        offset += PublicKey::SIZE;

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&buf[offset..offset + IV_SIZE]);
        offset += IV_SIZE;

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&buf[offset..offset + TAG_SIZE]);

        Ok(Self {
            mode,
            ephemeral_public_key,
            iv,
            tag,
        })
    }

    /// The associated data a single-recipient frame binds: everything
    /// up to and including the ephemeral key.
    pub fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(7 + PublicKey::SIZE);
        aad.extend_from_slice(&MAGIC);
        aad.extend_from_slice(&VERSION.to_be_bytes());
        aad.push(self.mode);
        aad.extend_from_slice(&self.ephemeral_public_key);
        aad
    }
}

/* Multi-recipient ********************************************************* */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiRecipientHeader {
    pub recipient_count: u16,
    pub chunk_index: u32,
    pub original_size: u32,
    pub encrypted_size: u32,
    pub flags: HeaderFlags,
    pub ephemeral_public_key: [u8; PublicKey::SIZE],
}

impl MultiRecipientHeader {
    pub fn to_bytes(&self) -> [u8; MULTI_HEADER_SIZE] {
        let mut out = [0u8; MULTI_HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..6].copy_from_slice(&VERSION.to_be_bytes());
        out[6..8].copy_from_slice(&self.recipient_count.to_be_bytes());
        out[8..12].copy_from_slice(&self.chunk_index.to_be_bytes());
        out[12..16].copy_from_slice(&self.original_size.to_be_bytes());
        out[16..20].copy_from_slice(&self.encrypted_size.to_be_bytes());
        out[20] = self.flags.to_byte();
        out[21..54].copy_from_slice(&self.ephemeral_public_key);
        // 54..64 reserved, zero
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, EciesError> {
        check_preamble(buf)?;
        if buf.len() < MULTI_HEADER_SIZE {
            return Err(EciesError::DataTooShortForHeader);
        }

        let mut ephemeral_public_key = [0u8; PublicKey::SIZE];
        ephemeral_public_key.copy_from_slice(&buf[21..54]);

        Ok(Self {
            recipient_count: u16::from_be_bytes([buf[6], buf[7]]),
            chunk_index: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            original_size: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            encrypted_size: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
            flags: HeaderFlags::from_byte(buf[20]),
            ephemeral_public_key,
        })
    }
}

/* Recipient table ********************************************************* */

/// One entry of a recipient table: the recipient id and the CEK
/// wrapped under that recipient's KEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientEntry {
    pub id: Vec<u8>,
    pub encrypted_key: Vec<u8>,
}

pub fn write_recipient_table(out: &mut Vec<u8>, entries: &[RecipientEntry]) {
    for entry in entries {
        out.extend_from_slice(&entry.id);
        out.extend_from_slice(&(entry.encrypted_key.len() as u16).to_be_bytes());
        out.extend_from_slice(&entry.encrypted_key);
    }
}

/// Parse `count` entries of `id_length`-byte ids from the front of
/// `buf`, returning the entries and the bytes consumed.
pub fn parse_recipient_table(
    buf: &[u8],
    count: u16,
    id_length: usize,
) -> Result<(Vec<RecipientEntry>, usize), EciesError> {
    let mut entries = Vec::with_capacity(count as usize);
    let mut offset = 0;
    for _ in 0..count {
        if buf.len() < offset + id_length + 2 {
            return Err(EciesError::DataTooShortForHeader);
        }
        let id = buf[offset..offset + id_length].to_vec();
        offset += id_length;
        let key_size =
            u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
        offset += 2;
        if buf.len() < offset + key_size {
            return Err(EciesError::DataTooShortForHeader);
        }
        let encrypted_key = buf[offset..offset + key_size].to_vec();
        offset += key_size;
        entries.push(RecipientEntry { id, encrypted_key });
    }
    Ok((entries, offset))
}

/* Stream ****************************************************************** */

/// Stream preamble: magic, then version, then mode, then flags, then
/// ephemeral pub, then recipientCount, then the recipient table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub flags: HeaderFlags,
    pub ephemeral_public_key: [u8; PublicKey::SIZE],
    pub recipients: Vec<RecipientEntry>,
}

impl StreamHeader {
    const FIXED_SIZE: usize = 4 + 2 + 1 + 1 + PublicKey::SIZE + 2;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.push(mode::STREAM);
        out.push(self.flags.to_byte());
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&(self.recipients.len() as u16).to_be_bytes());
        write_recipient_table(&mut out, &self.recipients);
        out
    }

    /// Incremental parse: `Ok(None)` means more bytes are needed.
    pub fn try_parse(buf: &[u8], id_length: usize) -> Result<Option<(Self, usize)>, EciesError> {
        if buf.len() < Self::FIXED_SIZE {
            return Ok(None);
        }
        let mut offset = check_preamble(buf)?;
        let found = buf[offset];
        if found != mode::STREAM {
            return Err(EciesError::InvalidCipherSuite { found });
        }
        offset += 1;
        let flags = HeaderFlags::from_byte(buf[offset]);
        offset += 1;

        let mut ephemeral_public_key = [0u8; PublicKey::SIZE];
        ephemeral_public_key.copy_from_slice(&buf[offset..offset + PublicKey::SIZE]);
        offset += PublicKey::SIZE;

        let count = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        offset += 2;

        match parse_recipient_table(&buf[offset..], count, id_length) {
            Ok((recipients, consumed)) => Ok(Some((
                Self {
                    flags,
                    ephemeral_public_key,
                    recipients,
                },
                offset + consumed,
            ))),
            // an under-full buffer is not an error while streaming
            Err(EciesError::DataTooShortForHeader) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> [u8; PublicKey::SIZE] {
        let mut key = [0u8; PublicKey::SIZE];
        key[0] = 0x02;
        key[32] = 0x7F;
        key
    }

    #[test]
    fn flags_roundtrip() {
        for byte in 0..=3u8 {
            assert_eq!(HeaderFlags::from_byte(byte).to_byte(), byte);
        }
        let flags = HeaderFlags {
            is_last: true,
            has_checksum: false,
        };
        assert_eq!(flags.to_byte(), 0b01);
    }

    #[test]
    fn multi_header_layout_is_stable() {
        let header = MultiRecipientHeader {
            recipient_count: 3,
            chunk_index: 7,
            original_size: 1000,
            encrypted_size: 1000,
            flags: HeaderFlags {
                is_last: true,
                has_checksum: true,
            },
            ephemeral_public_key: sample_key(),
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"MREC");
        assert_eq!(&bytes[4..6], &[0x00, 0x02]);
        assert_eq!(&bytes[6..8], &[0x00, 0x03]);
        assert_eq!(bytes[20], 0b11);
        assert_eq!(bytes[21], 0x02);
        assert!(bytes[54..].iter().all(|&b| b == 0));

        assert_eq!(MultiRecipientHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn preamble_failures_are_typed() {
        assert_eq!(
            check_preamble(b"MRE"),
            Err(EciesError::DataTooShortForHeader)
        );
        assert_eq!(
            check_preamble(b"XREC\x00\x02"),
            Err(EciesError::InvalidMagicBytes)
        );
        assert_eq!(
            check_preamble(b"MREC\x00\x01"),
            Err(EciesError::UnsupportedVersion { found: 1 })
        );
    }

    #[test]
    fn single_header_roundtrip() {
        let header = SingleHeader {
            mode: mode::SIMPLE,
            ephemeral_public_key: sample_key(),
            iv: [9u8; IV_SIZE],
            tag: [7u8; TAG_SIZE],
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        assert_eq!(bytes.len(), SINGLE_HEADER_SIZE);
        assert_eq!(SingleHeader::parse(&bytes, mode::SIMPLE).unwrap(), header);
        assert_eq!(
            SingleHeader::parse(&bytes, mode::WITH_HEADER),
            Err(EciesError::InvalidCipherSuite { found: mode::SIMPLE })
        );
    }

    #[test]
    fn recipient_table_roundtrip() {
        let entries = vec![
            RecipientEntry {
                id: vec![1u8; 16],
                encrypted_key: vec![0xAA; 48],
            },
            RecipientEntry {
                id: vec![2u8; 16],
                encrypted_key: vec![0xBB; 48],
            },
        ];
        let mut bytes = Vec::new();
        write_recipient_table(&mut bytes, &entries);

        let (parsed, consumed) = parse_recipient_table(&bytes, 2, 16).unwrap();
        assert_eq!(parsed, entries);
        assert_eq!(consumed, bytes.len());

        assert_eq!(
            parse_recipient_table(&bytes[..10], 2, 16),
            Err(EciesError::DataTooShortForHeader)
        );
    }

    #[test]
    fn stream_header_incremental_parse() {
        let header = StreamHeader {
            flags: HeaderFlags {
                is_last: false,
                has_checksum: true,
            },
            ephemeral_public_key: sample_key(),
            recipients: vec![RecipientEntry {
                id: vec![3u8; 16],
                encrypted_key: vec![0xCC; 48],
            }],
        };
        let bytes = header.to_bytes();

        // under-full buffers ask for more data
        for cut in [0, 5, StreamHeader::FIXED_SIZE, bytes.len() - 1] {
            assert_eq!(StreamHeader::try_parse(&bytes[..cut], 16).unwrap(), None);
        }

        let (parsed, consumed) = StreamHeader::try_parse(&bytes, 16).unwrap().unwrap();
        assert_eq!(parsed, header);
        assert_eq!(consumed, bytes.len());
    }
}
