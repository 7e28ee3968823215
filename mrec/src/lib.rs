//! Rust-native building blocks for trust-infrastructure applications
//!
//! MREC is a collection of modules for end-to-end encryption,
//! identity and ballot secrecy: a versioned ECIES codec over
//! secp256k1, BIP39/BIP32 identity wallets, and a Paillier-backed
//! verifiable-ballot engine. This crate doesn't provide any
//! particular application, it is meant to be used as a base layer by
//! higher-level use-cases such as messengers, registries or voting
//! services.

#[doc(inline)]
pub use mrec_codec as codec;

#[doc(inline)]
pub use mrec_crypto as crypto;

#[doc(inline)]
pub use mrec_ident as ident;

#[doc(inline)]
pub use mrec_wallet as wallet;

#[doc(inline)]
pub use mrec_ecies as ecies;

#[doc(inline)]
pub use mrec_paillier as paillier;

#[doc(inline)]
pub use mrec_voting as voting;

#[doc(inline)]
pub use mrec_member as member;
