//! Member identities.
//!
//! A [`Member`] binds an opaque id, profile metadata and key material:
//! the secp256k1 signing key (held obfuscated in a [`SecureBuffer`]),
//! the HD wallet it was derived from, and optionally the Paillier
//! voting keys derived from the member's own ECDH agreement. The
//! member borrows the [`EciesService`] for encryption; the service
//! never holds references back to members.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mrec_crypto::key::secp256k1::{PublicKey, SecretKey, Signature};
use mrec_crypto::{CancelToken, SecureBuffer};
use mrec_ecies::{EciesError, EciesService, Recipient};
use mrec_ident::IdProvider;
use mrec_paillier::{derive_keypair, DerivationConfig, PaillierKeyPair, PaillierPublicKey};
use mrec_wallet::HdWallet;

#[derive(Debug, Error)]
pub enum MemberError {
    #[error("member name must not be empty")]
    MissingMemberName,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("unknown member type {0:?}")]
    UnknownMemberType(String),
    #[error("member id is not parseable: {0}")]
    UnparseableId(String),
    #[error("mnemonic derives a different public key than expected")]
    MnemonicMismatch,
    #[error("member carries no private key")]
    MissingPrivateKey,
    #[error("invalid member document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
    #[error(transparent)]
    Wallet(#[from] mrec_wallet::Error),
    #[error(transparent)]
    Ecies(#[from] EciesError),
    #[error(transparent)]
    Secure(#[from] mrec_crypto::secure::Error),
    #[error(transparent)]
    Key(#[from] mrec_crypto::key::secp256k1::Error),
    #[error(transparent)]
    Paillier(#[from] mrec_paillier::Error),
}

impl MemberError {
    pub fn reason_key(&self) -> &'static str {
        match self {
            MemberError::MissingMemberName => "error.member.missingName",
            MemberError::InvalidEmail => "error.member.invalidEmail",
            MemberError::UnknownMemberType(_) => "error.member.unknownType",
            MemberError::UnparseableId(_) => "error.member.unparseableId",
            MemberError::MnemonicMismatch => "error.member.mnemonicMismatch",
            MemberError::MissingPrivateKey => "error.member.missingPrivateKey",
            MemberError::InvalidDocument(_) => "error.member.invalidDocument",
            MemberError::Wallet(_) => "error.member.wallet",
            MemberError::Ecies(_) => "error.member.ecies",
            MemberError::Secure(_) => "error.member.secure",
            MemberError::Key(_) => "error.member.key",
            MemberError::Paillier(_) => "error.member.paillier",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Admin,
    System,
    User,
    Anonymous,
}

impl MemberType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberType::Admin => "admin",
            MemberType::System => "system",
            MemberType::User => "user",
            MemberType::Anonymous => "anonymous",
        }
    }
}

impl std::str::FromStr for MemberType {
    type Err = MemberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(MemberType::Admin),
            "system" => Ok(MemberType::System),
            "user" => Ok(MemberType::User),
            "anonymous" => Ok(MemberType::Anonymous),
            other => Err(MemberError::UnknownMemberType(other.to_string())),
        }
    }
}

/// JSON interop form of a member's public profile.
#[derive(Debug, Serialize, Deserialize)]
struct MemberDoc {
    id: String,
    #[serde(rename = "type")]
    member_type: MemberType,
    name: String,
    email: String,
    #[serde(rename = "publicKey")]
    public_key: String,
    #[serde(rename = "creatorId")]
    creator_id: String,
    #[serde(rename = "dateCreated")]
    date_created: DateTime<Utc>,
    #[serde(rename = "dateUpdated")]
    date_updated: DateTime<Utc>,
}

pub struct Member {
    id: Vec<u8>,
    member_type: MemberType,
    name: String,
    email: String,
    public_key: PublicKey,
    creator_id: Vec<u8>,
    date_created: DateTime<Utc>,
    date_updated: DateTime<Utc>,
    private_key: Option<SecureBuffer>,
    wallet: Option<HdWallet>,
    voting_keys: Option<PaillierKeyPair>,
}

impl Member {
    /// Create a member with a fresh mnemonic wallet. Returns the
    /// member and the mnemonic sentence the caller must hand to the
    /// user for safekeeping.
    pub fn create<R: RngCore + CryptoRng>(
        service: &EciesService,
        mut rng: R,
        member_type: MemberType,
        name: &str,
        email: &str,
        creator_id: Option<Vec<u8>>,
    ) -> Result<(Self, String), MemberError> {
        let name = validate_name(name)?;
        let email = validate_email(email)?;
        let constants = service.constants();

        let wallet = HdWallet::generate(
            &mut rng,
            constants.mnemonic_strength,
            "",
            &constants.primary_key_derivation_path,
        )?;
        let mnemonic = wallet.mnemonic().to_string();

        let id = constants.id_provider.generate();
        let creator_id = creator_id.unwrap_or_else(|| id.clone());
        let member = Self::assemble(member_type, name, email, id, creator_id, wallet)?;
        Ok((member, mnemonic))
    }

    /// Rebuild a member from its mnemonic. When the expected public
    /// key is known (a stored profile), the recomputed key must
    /// match.
    pub fn from_mnemonic(
        service: &EciesService,
        member_type: MemberType,
        name: &str,
        email: &str,
        mnemonic: &str,
        id: Vec<u8>,
        creator_id: Vec<u8>,
        expected_public_key: Option<&PublicKey>,
    ) -> Result<Self, MemberError> {
        let name = validate_name(name)?;
        let email = validate_email(email)?;
        let constants = service.constants();

        let wallet = HdWallet::from_mnemonic(mnemonic, "", &constants.primary_key_derivation_path)?;
        if let Some(expected) = expected_public_key {
            if wallet.public_key() != *expected {
                return Err(MemberError::MnemonicMismatch);
            }
        }
        Self::assemble(member_type, name, email, id, creator_id, wallet)
    }

    fn assemble(
        member_type: MemberType,
        name: String,
        email: String,
        id: Vec<u8>,
        creator_id: Vec<u8>,
        wallet: HdWallet,
    ) -> Result<Self, MemberError> {
        let public_key = wallet.public_key();
        let secret = wallet.private_key();
        let private_key =
            SecureBuffer::new(unsafe { SecretKey::leak_into_bytes(secret) }.to_vec());
        let now = Utc::now();

        Ok(Self {
            id,
            member_type,
            name,
            email,
            public_key,
            creator_id,
            date_created: now,
            date_updated: now,
            private_key: Some(private_key),
            wallet: Some(wallet),
            voting_keys: None,
        })
    }

    /* accessors *********************************************************** */

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn member_type(&self) -> MemberType {
        self.member_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn creator_id(&self) -> &[u8] {
        &self.creator_id
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        self.date_created
    }

    pub fn date_updated(&self) -> DateTime<Utc> {
        self.date_updated
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn wallet(&self) -> Option<&HdWallet> {
        self.wallet.as_ref()
    }

    pub fn voting_keys(&self) -> Option<&PaillierKeyPair> {
        self.voting_keys.as_ref()
    }

    pub fn voting_public_key(&self) -> Option<&PaillierPublicKey> {
        self.voting_keys.as_ref().map(|pair| &pair.public)
    }

    /// Recover the signing key from the obfuscated store.
    fn signing_key(&self) -> Result<SecretKey, MemberError> {
        let buffer = self
            .private_key
            .as_ref()
            .ok_or(MemberError::MissingPrivateKey)?;
        let bytes = buffer.value()?;
        Ok(SecretKey::try_from(bytes.as_slice())?)
    }

    /* capabilities ******************************************************** */

    pub fn sign(&self, message: &[u8]) -> Result<Signature, MemberError> {
        Ok(self.signing_key()?.sign(message))
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.public_key.verify(message, signature)
    }

    /// Encrypt for another member's public key through the service.
    pub fn encrypt_to<R: RngCore + CryptoRng>(
        &self,
        service: &EciesService,
        rng: R,
        recipient: &PublicKey,
        data: &[u8],
    ) -> Result<Vec<u8>, MemberError> {
        Ok(service.encrypt(rng, recipient, data)?)
    }

    /// Decrypt a single-recipient frame addressed to this member.
    pub fn decrypt(&self, service: &EciesService, frame: &[u8]) -> Result<Vec<u8>, MemberError> {
        Ok(service.decrypt(&self.signing_key()?, frame)?)
    }

    /// Decrypt a multi-recipient frame addressed to this member.
    pub fn decrypt_multiple(
        &self,
        service: &EciesService,
        frame: &[u8],
    ) -> Result<Vec<u8>, MemberError> {
        Ok(service.decrypt_multiple(&self.signing_key()?, &self.id, frame)?)
    }

    /// This member as a multi-recipient [`Recipient`].
    pub fn as_recipient(&self) -> Recipient {
        Recipient {
            id: self.id.clone(),
            public_key: self.public_key,
        }
    }

    /// Derive (or re-derive) the voting key pair from this member's
    /// own ECDH agreement. Deterministic for a given identity.
    pub fn derive_voting_keys(
        &mut self,
        config: DerivationConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<&PaillierKeyPair, MemberError> {
        let secret = self.signing_key()?;
        let pair = derive_keypair(&secret, &self.public_key, config, cancel)?;
        self.date_updated = Utc::now();
        self.voting_keys = Some(pair);
        Ok(self.voting_keys.as_ref().expect("just set"))
    }

    /// Zeroize and drop all private material. The public profile
    /// stays usable.
    pub fn dispose(&mut self) {
        if let Some(buffer) = &mut self.private_key {
            buffer.dispose();
        }
        self.private_key = None;
        self.wallet = None;
        self.voting_keys = None;
        self.date_updated = Utc::now();
    }

    /* interop ************************************************************* */

    /// Serialize the public profile with provider-encoded ids.
    pub fn to_json(&self, provider: &dyn IdProvider) -> Result<String, MemberError> {
        let doc = MemberDoc {
            id: provider
                .serialize(&self.id)
                .map_err(|e| MemberError::UnparseableId(e.to_string()))?,
            member_type: self.member_type,
            name: self.name.clone(),
            email: self.email.clone(),
            public_key: BASE64.encode(self.public_key.as_ref()),
            creator_id: provider
                .serialize(&self.creator_id)
                .map_err(|e| MemberError::UnparseableId(e.to_string()))?,
            date_created: self.date_created,
            date_updated: self.date_updated,
        };
        Ok(serde_json::to_string(&doc)?)
    }

    /// Parse a public profile. An id whose length does not match the
    /// configured provider is accepted with a warning so that
    /// documents survive provider migrations.
    pub fn from_json(service: &EciesService, json: &str) -> Result<Self, MemberError> {
        let doc: MemberDoc = serde_json::from_str(json)?;
        let provider = service.constants().id_provider.as_ref();

        let id = parse_id_lenient(provider, &doc.id)?;
        let creator_id = parse_id_lenient(provider, &doc.creator_id)?;

        let key_bytes = BASE64
            .decode(&doc.public_key)
            .map_err(|e| MemberError::UnparseableId(e.to_string()))?;
        let public_key = PublicKey::try_from(key_bytes.as_slice())?;

        Ok(Self {
            id,
            member_type: doc.member_type,
            name: validate_name(&doc.name)?,
            email: validate_email(&doc.email)?,
            public_key,
            creator_id,
            date_created: doc.date_created,
            date_updated: doc.date_updated,
            private_key: None,
            wallet: None,
            voting_keys: None,
        })
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("id", &hex::encode(&self.id))
            .field("type", &self.member_type)
            .field("name", &self.name)
            .field("has_private_key", &self.private_key.is_some())
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> Result<String, MemberError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(MemberError::MissingMemberName);
    }
    Ok(trimmed.to_string())
}

fn validate_email(email: &str) -> Result<String, MemberError> {
    let email = email.trim();
    if email.contains(char::is_whitespace) {
        return Err(MemberError::InvalidEmail);
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(MemberError::InvalidEmail);
    };
    let domain_ok =
        domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.');
    if local.is_empty() || !domain_ok {
        return Err(MemberError::InvalidEmail);
    }
    Ok(email.to_string())
}

/// Provider parse with a migration fallback: when the provider
/// rejects the string form, fall back to hex (hyphens stripped) and
/// warn if the recovered length differs from the configured one.
fn parse_id_lenient(provider: &dyn IdProvider, text: &str) -> Result<Vec<u8>, MemberError> {
    match provider.deserialize(text) {
        Ok(bytes) => Ok(bytes),
        Err(_) => {
            let stripped: String = text.chars().filter(|c| *c != '-').collect();
            let bytes = hex::decode(&stripped)
                .map_err(|_| MemberError::UnparseableId(text.to_string()))?;
            if bytes.len() != provider.byte_length() {
                tracing::warn!(
                    expected = provider.byte_length(),
                    actual = bytes.len(),
                    "member id length differs from the configured provider"
                );
            }
            Ok(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrec_crypto::secure;
    use rand::rngs::OsRng;

    fn service() -> EciesService {
        EciesService::with_defaults()
    }

    fn member(service: &EciesService) -> (Member, String) {
        Member::create(
            service,
            OsRng,
            MemberType::User,
            "Alice Example",
            "alice@example.com",
            None,
        )
        .unwrap()
    }

    #[test]
    fn create_yields_working_keys() {
        let service = service();
        let (member, mnemonic) = member(&service);

        assert_eq!(member.id().len(), 16);
        assert_eq!(member.creator_id(), member.id());
        assert!(!mnemonic.is_empty());

        let signature = member.sign(b"message").unwrap();
        assert!(member.verify(b"message", &signature));
        assert!(!member.verify(b"other message", &signature));
    }

    #[test]
    fn mnemonic_restores_the_same_identity() {
        let service = service();
        let (original, mnemonic) = member(&service);

        let restored = Member::from_mnemonic(
            &service,
            MemberType::User,
            "Alice Example",
            "alice@example.com",
            &mnemonic,
            original.id().to_vec(),
            original.creator_id().to_vec(),
            Some(original.public_key()),
        )
        .unwrap();
        assert_eq!(restored.public_key(), original.public_key());
    }

    #[test]
    fn wrong_mnemonic_is_detected() {
        let service = service();
        let (original, _) = member(&service);
        let (_, other_mnemonic) = member(&service);

        assert!(matches!(
            Member::from_mnemonic(
                &service,
                MemberType::User,
                "Alice Example",
                "alice@example.com",
                &other_mnemonic,
                original.id().to_vec(),
                original.creator_id().to_vec(),
                Some(original.public_key()),
            ),
            Err(MemberError::MnemonicMismatch)
        ));
    }

    #[test]
    fn members_can_exchange_messages() {
        let service = service();
        let (alice, _) = member(&service);
        let (bob, _) = member(&service);

        let frame = alice
            .encrypt_to(&service, OsRng, bob.public_key(), b"for bob")
            .unwrap();
        assert_eq!(bob.decrypt(&service, &frame).unwrap(), b"for bob");
    }

    #[test]
    fn validation_rejects_bad_profiles() {
        let service = service();
        assert!(matches!(
            Member::create(&service, OsRng, MemberType::User, "   ", "a@b.io", None),
            Err(MemberError::MissingMemberName)
        ));
        for email in ["", "nope", "@host.io", "user@", "user@host", "user@.io", "a b@c.io"] {
            assert!(
                matches!(
                    Member::create(&service, OsRng, MemberType::User, "Name", email, None),
                    Err(MemberError::InvalidEmail)
                ),
                "email {email:?} should be rejected"
            );
        }
    }

    #[test]
    fn names_are_stored_trimmed() {
        let service = service();
        let (member, _) = Member::create(
            &service,
            OsRng,
            MemberType::User,
            "  Alice  ",
            "alice@example.com",
            None,
        )
        .unwrap();
        assert_eq!(member.name(), "Alice");
    }

    #[test]
    fn disposed_member_cannot_sign() {
        let service = service();
        let (mut member, _) = member(&service);
        member.dispose();

        assert!(member.wallet().is_none());
        // the key buffer was disposed along with the wallet
        assert!(matches!(
            member.sign(b"message"),
            Err(MemberError::MissingPrivateKey)
        ));
    }

    #[test]
    fn disposed_buffer_error_carries_the_stack() {
        let mut buffer = SecureBuffer::from_slice(b"secret");
        buffer.dispose();
        match buffer.value() {
            Err(secure::Error::ObjectDisposed { stack }) => assert!(!stack.is_empty()),
            other => panic!("expected ObjectDisposed, got {other:?}"),
        }
    }

    #[test]
    fn json_roundtrip_preserves_the_profile() {
        let service = service();
        let (member, _) = member(&service);
        let provider = service.constants().id_provider.clone();

        let json = member.to_json(provider.as_ref()).unwrap();
        let parsed = Member::from_json(&service, &json).unwrap();

        assert_eq!(parsed.id(), member.id());
        assert_eq!(parsed.name(), member.name());
        assert_eq!(parsed.email(), member.email());
        assert_eq!(parsed.public_key(), member.public_key());
        assert!(!parsed.has_private_key());
    }

    #[test]
    fn provider_migration_parses_with_warning() {
        use mrec_ecies::{Constants, EciesConfig};
        use mrec_ident::ObjectIdProvider;
        use std::sync::Arc;

        // serialize under a 12-byte ObjectID service
        let object_service = EciesService::new(
            Constants::from_config(EciesConfig {
                id_provider: Some(Arc::new(ObjectIdProvider::new())),
                ..Default::default()
            })
            .unwrap(),
        );
        let (member, _) = Member::create(
            &object_service,
            OsRng,
            MemberType::User,
            "Migrating Member",
            "m@example.com",
            None,
        )
        .unwrap();
        let json = member
            .to_json(object_service.constants().id_provider.as_ref())
            .unwrap();

        // re-parse under the default 16-byte GUID service
        let guid_service = EciesService::with_defaults();
        let parsed = Member::from_json(&guid_service, &json).unwrap();
        assert_eq!(parsed.id().len(), 12);
        assert_ne!(
            parsed.id().len(),
            guid_service.constants().id_provider.byte_length()
        );
    }

    #[test]
    fn voting_keys_bind_to_the_identity() {
        let service = service();
        let (mut member, _) = member(&service);
        let config = DerivationConfig {
            bit_length: 512,
            mr_iterations: 32,
            max_attempts: 20_000,
        };

        let first = member.derive_voting_keys(config, None).unwrap().public.clone();
        let second = member.derive_voting_keys(config, None).unwrap().public.clone();
        assert_eq!(first.n(), second.n());
    }
}
