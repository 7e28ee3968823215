//! Service configuration.
//!
//! A [`Constants`] bundle is assembled once from an [`EciesConfig`]
//! (overrides merged over built-in defaults), validated, and then
//! shared immutably for the lifetime of the service. Named bundles
//! can be registered for lookup; the `"default"` name is reserved
//! for the built-in configuration and cannot be overwritten.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use thiserror::Error;

use mrec_ident::{GuidV4Provider, IdProvider};
use mrec_wallet::wrapper::Pbkdf2Profile;
use mrec_wallet::{DerivationPath, MnemonicStrength};

/// The only curve the v1 cipher suite supports.
pub const CURVE_NAME: &str = "secp256k1";
/// The only symmetric algorithm the v1 cipher suite supports.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";
/// Registry name of the built-in configuration.
pub const DEFAULT_CONFIG_NAME: &str = "default";

const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const MAX_CHUNK_SIZE: usize = 1024 * 1024;
const MAX_RECIPIENTS: u16 = u16::MAX;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The provider's emitted id length does not match the configured
    /// member id length.
    #[error("id provider emits {actual}-byte ids but member ids are {expected} bytes")]
    IdProviderByteLengthMismatch { expected: usize, actual: usize },
    /// The provider's id length is outside 1..=255.
    #[error("id provider byte length {0} is out of range")]
    InvalidByteLengthParameter(usize),
    /// Something other than the fixed v1 suite was requested.
    #[error("unsupported cipher suite: {0}")]
    InvalidCipherSuite(String),
    #[error("unsupported mnemonic strength: {0} bits")]
    InvalidMnemonicStrength(usize),
    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),
    #[error("chunk size {actual} exceeds the maximum of {max}")]
    InvalidChunkSize { max: usize, actual: usize },
    #[error("configuration name {0:?} is reserved")]
    ReservedConfigName(String),
}

impl ConfigError {
    pub fn reason_key(&self) -> &'static str {
        match self {
            ConfigError::IdProviderByteLengthMismatch { .. } => {
                "error.config.idProviderByteLengthMismatch"
            }
            ConfigError::InvalidByteLengthParameter(_) => "error.config.invalidByteLengthParameter",
            ConfigError::InvalidCipherSuite(_) => "error.config.invalidCipherSuite",
            ConfigError::InvalidMnemonicStrength(_) => "error.config.invalidMnemonicStrength",
            ConfigError::InvalidDerivationPath(_) => "error.config.invalidDerivationPath",
            ConfigError::InvalidChunkSize { .. } => "error.config.invalidChunkSize",
            ConfigError::ReservedConfigName(_) => "error.config.reservedConfigName",
        }
    }
}

/// Caller-facing overrides. Unset fields take the built-in defaults.
#[derive(Default)]
pub struct EciesConfig {
    pub curve_name: Option<String>,
    pub symmetric_algorithm: Option<String>,
    pub primary_key_derivation_path: Option<String>,
    pub mnemonic_strength_bits: Option<usize>,
    pub id_provider: Option<Arc<dyn IdProvider>>,
    /// Expected member id length; defaults to the provider's length.
    pub member_id_length: Option<usize>,
    pub max_recipients: Option<u16>,
    pub chunk_size_default: Option<usize>,
    pub pbkdf2: Option<Pbkdf2Profile>,
}

/// The frozen bundle a service runs with.
pub struct Constants {
    pub primary_key_derivation_path: DerivationPath,
    pub mnemonic_strength: MnemonicStrength,
    pub id_provider: Arc<dyn IdProvider>,
    pub member_id_length: usize,
    pub max_recipients: u16,
    pub chunk_size_default: usize,
    pub chunk_size_max: usize,
    pub pbkdf2: Pbkdf2Profile,
}

impl Constants {
    /// Merge `config` over the defaults and validate the result.
    pub fn from_config(config: EciesConfig) -> Result<Arc<Self>, ConfigError> {
        if let Some(curve) = &config.curve_name {
            if curve != CURVE_NAME {
                return Err(ConfigError::InvalidCipherSuite(curve.clone()));
            }
        }
        if let Some(algorithm) = &config.symmetric_algorithm {
            if algorithm != SYMMETRIC_ALGORITHM {
                return Err(ConfigError::InvalidCipherSuite(algorithm.clone()));
            }
        }

        let path_text = config
            .primary_key_derivation_path
            .as_deref()
            .unwrap_or(DEFAULT_DERIVATION_PATH);
        let primary_key_derivation_path: DerivationPath = path_text
            .parse()
            .map_err(|_| ConfigError::InvalidDerivationPath(path_text.to_string()))?;

        let mnemonic_strength = match config.mnemonic_strength_bits {
            Some(bits) => MnemonicStrength::from_bits(bits)
                .ok_or(ConfigError::InvalidMnemonicStrength(bits))?,
            None => MnemonicStrength::default(),
        };

        let id_provider: Arc<dyn IdProvider> = config
            .id_provider
            .unwrap_or_else(|| Arc::new(GuidV4Provider::new()));
        let provider_length = id_provider.byte_length();
        if provider_length == 0 || provider_length > 255 {
            return Err(ConfigError::InvalidByteLengthParameter(provider_length));
        }
        let member_id_length = config.member_id_length.unwrap_or(provider_length);
        if member_id_length != provider_length {
            return Err(ConfigError::IdProviderByteLengthMismatch {
                expected: member_id_length,
                actual: provider_length,
            });
        }

        let chunk_size_default = config.chunk_size_default.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size_default == 0 || chunk_size_default > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                max: MAX_CHUNK_SIZE,
                actual: chunk_size_default,
            });
        }

        Ok(Arc::new(Self {
            primary_key_derivation_path,
            mnemonic_strength,
            id_provider,
            member_id_length,
            max_recipients: config.max_recipients.unwrap_or(MAX_RECIPIENTS),
            chunk_size_default,
            chunk_size_max: MAX_CHUNK_SIZE,
            pbkdf2: config.pbkdf2.unwrap_or_default(),
        }))
    }

    /// The built-in default bundle.
    pub fn default_bundle() -> Arc<Self> {
        Self::from_config(EciesConfig::default()).expect("defaults are valid")
    }
}

impl std::fmt::Debug for Constants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constants")
            .field(
                "primary_key_derivation_path",
                &self.primary_key_derivation_path.to_string(),
            )
            .field("mnemonic_strength", &self.mnemonic_strength)
            .field("member_id_length", &self.member_id_length)
            .field("max_recipients", &self.max_recipients)
            .field("chunk_size_default", &self.chunk_size_default)
            .finish_non_exhaustive()
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<Constants>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<Constants>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a named bundle. The `"default"` name is reserved.
pub fn register(name: &str, constants: Arc<Constants>) -> Result<(), ConfigError> {
    if name == DEFAULT_CONFIG_NAME {
        return Err(ConfigError::ReservedConfigName(name.to_string()));
    }
    registry()
        .write()
        .expect("registry poisoned")
        .insert(name.to_string(), constants);
    Ok(())
}

/// Look up a named bundle; `"default"` always resolves.
pub fn lookup(name: &str) -> Option<Arc<Constants>> {
    if name == DEFAULT_CONFIG_NAME {
        return Some(Constants::default_bundle());
    }
    registry()
        .read()
        .expect("registry poisoned")
        .get(name)
        .cloned()
}
