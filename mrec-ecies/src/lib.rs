//! ECIES framing and streaming.
//!
//! Hybrid public-key encryption over secp256k1 with AES-256-GCM and
//! HKDF-SHA-512, producing self-describing versioned frames in four
//! modes: single-recipient simple, single-recipient with explicit
//! length and checksum, multi-recipient, and chunked streams.
//!
//! The [`EciesService`] is the entry point; it owns a frozen
//! [`config::Constants`] bundle selected at construction time.

pub mod config;
pub mod error;
pub mod header;
pub mod service;
pub mod stream;

pub use config::{Constants, EciesConfig};
pub use error::EciesError;
pub use service::{EciesService, Recipient};
pub use stream::{DecryptionStream, EncryptionStream, Progress, StreamOptions};
