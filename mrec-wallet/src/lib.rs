use bip39::rand_core::{CryptoRng, RngCore};
use bip39::{Language, Mnemonic};

use mrec_crypto::key::secp256k1::{PublicKey, SecretKey};
use thiserror::Error;

pub mod hd;
pub mod wrapper;

pub use hd::{Bip32PrivateKey, DerivationPath};

#[derive(Error, Debug)]
pub enum Error {
    /// Private key wrapper data of unexpected length
    #[error("Wrapped mnemonic data invalid length")]
    WrapperDataInvalidSize,
    /// Failed to decrypt private key wrapper data
    #[error("Failed to decrypt wrapped mnemonic data")]
    WrapperDataFailedToDecrypt,
    /// Error relating to bip39 mnemonic
    #[error("Error relating to bip39 mnemonic: {0}")]
    Mnemonic(bip39::Error),
    /// The seed digest does not yield a usable master scalar
    #[error("Seed does not derive a valid master key")]
    InvalidSeed,
    /// A derivation step produced an out-of-range or zero scalar
    #[error("Derivation produced an invalid child key at index {0}")]
    InvalidChildKey(u32),
    /// A derivation path string could not be parsed
    #[error("Invalid derivation path: {0}")]
    InvalidDerivationPath(String),
    /// Error bubbled up from the key layer
    #[error(transparent)]
    Key(#[from] mrec_crypto::key::secp256k1::Error),
}

impl Error {
    pub fn reason_key(&self) -> &'static str {
        match self {
            Error::WrapperDataInvalidSize => "error.wallet.wrapperInvalidSize",
            Error::WrapperDataFailedToDecrypt => "error.wallet.wrapperFailedToDecrypt",
            Error::Mnemonic(_) => "error.wallet.mnemonic",
            Error::InvalidSeed => "error.wallet.invalidSeed",
            Error::InvalidChildKey(_) => "error.wallet.invalidChildKey",
            Error::InvalidDerivationPath(_) => "error.wallet.invalidDerivationPath",
            Error::Key(_) => "error.wallet.key",
        }
    }
}

/// Entropy strength of a generated mnemonic, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MnemonicStrength {
    Bits128,
    Bits160,
    Bits192,
    Bits224,
    #[default]
    Bits256,
}

impl MnemonicStrength {
    pub fn bits(self) -> usize {
        match self {
            Self::Bits128 => 128,
            Self::Bits160 => 160,
            Self::Bits192 => 192,
            Self::Bits224 => 224,
            Self::Bits256 => 256,
        }
    }

    pub fn word_count(self) -> usize {
        // 3 words per 32 bits of entropy
        self.bits() * 3 / 32
    }

    pub fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            128 => Some(Self::Bits128),
            160 => Some(Self::Bits160),
            192 => Some(Self::Bits192),
            224 => Some(Self::Bits224),
            256 => Some(Self::Bits256),
            _ => None,
        }
    }
}

/// An HD wallet: a mnemonic plus the signing key derived at a fixed
/// path.
///
/// The wallet retains the mnemonic so it can be re-wrapped for
/// storage (see [`wrapper`]); dropping the wallet scrubs the derived
/// key material through its [`Bip32PrivateKey`].
pub struct HdWallet {
    mnemonic: Mnemonic,
    derived: Bip32PrivateKey,
}

impl HdWallet {
    /// Generate a fresh mnemonic of the given strength and derive the
    /// signing key at `path`.
    pub fn generate<T: RngCore + CryptoRng>(
        mut rng: T,
        strength: MnemonicStrength,
        passphrase: &str,
        path: &DerivationPath,
    ) -> Result<Self, Error> {
        let mnemonic =
            Mnemonic::generate_in_with(&mut rng, Language::English, strength.word_count())
                .map_err(Error::Mnemonic)?;
        Self::from_parsed(mnemonic, passphrase, path)
    }

    /// Rebuild the wallet from an existing mnemonic sentence.
    pub fn from_mnemonic(phrase: &str, passphrase: &str, path: &DerivationPath) -> Result<Self, Error> {
        let mnemonic =
            Mnemonic::parse_in_normalized(Language::English, phrase).map_err(Error::Mnemonic)?;
        Self::from_parsed(mnemonic, passphrase, path)
    }

    fn from_parsed(
        mnemonic: Mnemonic,
        passphrase: &str,
        path: &DerivationPath,
    ) -> Result<Self, Error> {
        let seed = mnemonic.to_seed(passphrase);
        let root = Bip32PrivateKey::from_seed(&seed)?;
        let derived = root.derive_path(path)?;
        Ok(Self { mnemonic, derived })
    }

    pub fn mnemonic(&self) -> &Mnemonic {
        &self.mnemonic
    }

    /// The signing key at the wallet's derivation path.
    pub fn private_key(&self) -> SecretKey {
        self.derived.to_signing_key()
    }

    /// Compressed public key matching [`HdWallet::private_key`].
    pub fn public_key(&self) -> PublicKey {
        self.derived.to_signing_key().public_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bip39::rand_core::OsRng;

    #[test]
    fn mnemonic_roundtrip() {
        let path: DerivationPath = "m/44'/60'/0'/0/0".parse().unwrap();
        let wallet = HdWallet::generate(OsRng, MnemonicStrength::Bits256, "", &path).unwrap();

        let restored =
            HdWallet::from_mnemonic(&wallet.mnemonic().to_string(), "", &path).unwrap();

        assert_eq!(wallet.public_key(), restored.public_key());
    }

    #[test]
    fn passphrase_changes_keys() {
        let path: DerivationPath = "m/44'/60'/0'/0/0".parse().unwrap();
        let wallet = HdWallet::generate(OsRng, MnemonicStrength::Bits128, "", &path).unwrap();
        let phrase = wallet.mnemonic().to_string();

        let other = HdWallet::from_mnemonic(&phrase, "trezor", &path).unwrap();
        assert_ne!(wallet.public_key(), other.public_key());
    }

    #[test]
    fn strength_maps_to_word_count() {
        assert_eq!(MnemonicStrength::Bits128.word_count(), 12);
        assert_eq!(MnemonicStrength::Bits160.word_count(), 15);
        assert_eq!(MnemonicStrength::Bits192.word_count(), 18);
        assert_eq!(MnemonicStrength::Bits224.word_count(), 21);
        assert_eq!(MnemonicStrength::Bits256.word_count(), 24);
        assert_eq!(MnemonicStrength::from_bits(192), Some(MnemonicStrength::Bits192));
        assert_eq!(MnemonicStrength::from_bits(129), None);
    }

    #[test]
    fn generated_word_count_matches_strength() {
        let path: DerivationPath = "m/0".parse().unwrap();
        for strength in [MnemonicStrength::Bits128, MnemonicStrength::Bits256] {
            let wallet = HdWallet::generate(OsRng, strength, "", &path).unwrap();
            assert_eq!(wallet.mnemonic().word_count(), strength.word_count());
        }
    }
}
