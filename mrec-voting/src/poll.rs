//! Poll lifecycle, signed receipts and the vote store.

use chrono::{DateTime, Utc};
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use mrec_crypto::key::secp256k1::{PublicKey, SecretKey, Signature};
use mrec_paillier::PaillierPublicKey;

use crate::audit::{AuditEvent, AuditLog};
use crate::encoder::EncryptedVote;
use crate::method::{SecurityLevel, SupermajorityConfig, VotingMethod};
use crate::VoteError;

/// Version byte pair of the receipt transcript format.
const RECEIPT_VERSION: u16 = 0x0001;

/// Construction parameters for a poll.
pub struct PollParams {
    pub choices: Vec<String>,
    pub method: VotingMethod,
    pub authority_id: Vec<u8>,
    pub voting_key: PaillierPublicKey,
    pub max_weight: Option<u64>,
    pub allow_insecure: bool,
    /// Seats to fill; only meaningful for STV.
    pub seats: usize,
    pub supermajority: Option<SupermajorityConfig>,
}

impl PollParams {
    pub fn new(
        choices: Vec<String>,
        method: VotingMethod,
        authority_id: Vec<u8>,
        voting_key: PaillierPublicKey,
    ) -> Self {
        Self {
            choices,
            method,
            authority_id,
            voting_key,
            max_weight: None,
            allow_insecure: false,
            seats: 1,
            supermajority: None,
        }
    }
}

/// Authority-signed proof that a specific encrypted vote was accepted
/// by a specific poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub voter_id: Vec<u8>,
    pub poll_id: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub nonce: [u8; 16],
    pub signature: Signature,
}

/// Canonical transcript a receipt signature covers.
fn receipt_transcript(
    poll_id: &[u8],
    voter_id: &[u8],
    timestamp: i64,
    nonce: &[u8; 16],
    vote_commitment: &[u8; 32],
) -> Vec<u8> {
    let mut transcript =
        Vec::with_capacity(2 + poll_id.len() + voter_id.len() + 8 + nonce.len() + 32);
    transcript.extend_from_slice(&RECEIPT_VERSION.to_be_bytes());
    transcript.extend_from_slice(poll_id);
    transcript.extend_from_slice(voter_id);
    transcript.extend_from_slice(&timestamp.to_be_bytes());
    transcript.extend_from_slice(nonce);
    transcript.extend_from_slice(vote_commitment);
    transcript
}

pub struct Poll {
    pub(crate) id: Vec<u8>,
    pub(crate) choices: Vec<String>,
    pub(crate) method: VotingMethod,
    pub(crate) authority_id: Vec<u8>,
    pub(crate) voting_key: PaillierPublicKey,
    pub(crate) max_weight: Option<u64>,
    pub(crate) seats: usize,
    pub(crate) supermajority: SupermajorityConfig,
    authority_signing_key: SecretKey,
    authority_public_key: PublicKey,
    pub(crate) is_closed: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) closed_at: Option<DateTime<Utc>>,
    /// Insertion-ordered voter → vote records.
    votes: Vec<(Vec<u8>, EncryptedVote)>,
    receipts: Vec<(Vec<u8>, VoteReceipt)>,
    audit: AuditLog,
}

impl Poll {
    /// Create an open poll. The authority signing key issues receipts
    /// for accepted votes.
    pub fn new(
        id: Vec<u8>,
        params: PollParams,
        authority_signing_key: SecretKey,
    ) -> Result<Self, VoteError> {
        if params.choices.len() < 2 {
            return Err(VoteError::TooFewChoices(params.choices.len()));
        }
        if params.method.is_insecure() && !params.allow_insecure {
            return Err(VoteError::InsecureMethodNotAllowed(params.method));
        }

        let authority_public_key = authority_signing_key.public_key();
        let mut audit = AuditLog::new();
        audit.append(
            AuditEvent::PollCreated,
            &params.authority_id,
            &[&id[..], params.choices.join("\n").as_bytes()].concat(),
        );

        Ok(Self {
            id,
            choices: params.choices,
            method: params.method,
            authority_id: params.authority_id,
            voting_key: params.voting_key,
            max_weight: params.max_weight,
            seats: params.seats.max(1),
            supermajority: params.supermajority.unwrap_or_default(),
            authority_signing_key,
            authority_public_key,
            is_closed: false,
            created_at: Utc::now(),
            closed_at: None,
            votes: Vec::new(),
            receipts: Vec::new(),
            audit,
        })
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    pub fn method(&self) -> VotingMethod {
        self.method
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.method.security_level()
    }

    pub fn voting_key(&self) -> &PaillierPublicKey {
        &self.voting_key
    }

    pub fn max_weight(&self) -> Option<u64> {
        self.max_weight
    }

    pub fn authority_id(&self) -> &[u8] {
        &self.authority_id
    }

    pub fn authority_public_key(&self) -> &PublicKey {
        &self.authority_public_key
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// Insertion-ordered read-only view of the accepted votes.
    pub fn encrypted_votes(&self) -> &[(Vec<u8>, EncryptedVote)] {
        &self.votes
    }

    /// Read-only view of the audit log.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn receipt_for(&self, voter_id: &[u8]) -> Option<&VoteReceipt> {
        self.receipts
            .iter()
            .find(|(id, _)| id == voter_id)
            .map(|(_, receipt)| receipt)
    }

    pub(crate) fn audit_append(&mut self, event: AuditEvent, actor: &[u8], payload: &[u8]) {
        self.audit.append(event, actor, payload);
    }

    /// Accept a vote, returning the signed receipt.
    pub fn vote<R: RngCore + CryptoRng>(
        &mut self,
        voter_id: &[u8],
        vote: EncryptedVote,
        mut rng: R,
    ) -> Result<VoteReceipt, VoteError> {
        if self.is_closed {
            return Err(VoteError::PollClosed);
        }
        if self.votes.iter().any(|(id, _)| id == voter_id) {
            return Err(VoteError::AlreadyVoted);
        }
        if vote.method() != self.method {
            return Err(VoteError::MethodMismatch {
                poll: self.method,
                vote: vote.method(),
            });
        }
        vote.intent.validate(self.choices.len(), self.max_weight)?;
        if vote.ciphertexts.is_empty() {
            return Err(VoteError::EmptyEncryptedVote);
        }
        if vote.ciphertexts.len() != self.choices.len() {
            return Err(VoteError::CiphertextCountMismatch {
                expected: self.choices.len(),
                actual: vote.ciphertexts.len(),
            });
        }

        let commitment = vote.commitment();
        let timestamp = Utc::now();
        let mut nonce = [0u8; 16];
        rng.fill_bytes(&mut nonce);

        let transcript = receipt_transcript(
            &self.id,
            voter_id,
            timestamp.timestamp(),
            &nonce,
            &commitment,
        );
        let signature = self.authority_signing_key.sign(&transcript);

        let receipt = VoteReceipt {
            voter_id: voter_id.to_vec(),
            poll_id: self.id.clone(),
            timestamp,
            nonce,
            signature,
        };

        self.votes.push((voter_id.to_vec(), vote));
        self.receipts.push((voter_id.to_vec(), receipt.clone()));
        self.audit.append(AuditEvent::VoteCast, voter_id, &commitment);
        tracing::debug!(voters = self.votes.len(), "vote accepted");

        Ok(receipt)
    }

    /// Check a receipt against this poll's stored vote for the voter.
    pub fn verify_receipt(&self, voter_id: &[u8], receipt: &VoteReceipt) -> bool {
        if receipt.voter_id != voter_id || receipt.poll_id != self.id {
            return false;
        }
        let Some((_, vote)) = self.votes.iter().find(|(id, _)| id == voter_id) else {
            return false;
        };
        let transcript = receipt_transcript(
            &self.id,
            voter_id,
            receipt.timestamp.timestamp(),
            &receipt.nonce,
            &vote.commitment(),
        );
        self.authority_public_key
            .verify(&transcript, &receipt.signature)
    }

    /// Close the poll. Terminal: a closed poll accepts no votes and
    /// cannot be reopened.
    pub fn close(&mut self) -> Result<(), VoteError> {
        if self.is_closed {
            return Err(VoteError::AlreadyClosed);
        }
        self.is_closed = true;
        self.closed_at = Some(Utc::now());
        let vote_count = self.votes.len() as u64;
        let authority = self.authority_id.clone();
        self.audit.append(
            AuditEvent::PollClosed,
            &authority,
            &vote_count.to_be_bytes(),
        );
        Ok(())
    }

    /// Hash of the poll's identifying fields, used as the audit
    /// payload of the tally event.
    pub(crate) fn tally_payload(&self, tallies: &[u64]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.id);
        for tally in tallies {
            hasher.update(tally.to_be_bytes());
        }
        hasher.finalize().into()
    }
}
