//! Encoding plaintext intents into Paillier ciphertext vectors.
//!
//! A ballot over `k` choices always becomes a length-`k` vector of
//! ciphertexts, whatever the method; the per-slot plaintext carries
//! the method's semantics (a one-hot mark, a weight, a Borda score, a
//! rank position). Uniform shape keeps the tallier's homomorphic fold
//! method-agnostic.

use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use mrec_codec::length::length_encode_data;
use mrec_paillier::PaillierPublicKey;

use crate::method::VotingMethod;
use crate::VoteError;

/// Highest score a Score-method ballot may assign.
pub const MAX_SCORE: u64 = 10;
/// Highest per-candidate score on a STAR ballot.
pub const MAX_STAR_SCORE: u64 = 5;

/// A voter's plaintext intent, one variant per voting method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteIntent {
    Plurality { choice: usize },
    Approval { choices: Vec<usize> },
    Weighted { choice: usize, weight: u64 },
    Borda { rankings: Vec<usize> },
    Score { choice: usize, score: u64 },
    YesNo { choice: usize },
    YesNoAbstain { choice: usize },
    Supermajority { choice: usize },
    RankedChoice { rankings: Vec<usize> },
    TwoRound { choice: usize },
    Star { scores: Vec<u64> },
    Stv { rankings: Vec<usize> },
    Quadratic { allocations: Vec<u64> },
    Consensus { choice: usize },
    ConsentBased { choice: usize },
}

impl VoteIntent {
    pub fn method(&self) -> VotingMethod {
        match self {
            VoteIntent::Plurality { .. } => VotingMethod::Plurality,
            VoteIntent::Approval { .. } => VotingMethod::Approval,
            VoteIntent::Weighted { .. } => VotingMethod::Weighted,
            VoteIntent::Borda { .. } => VotingMethod::Borda,
            VoteIntent::Score { .. } => VotingMethod::Score,
            VoteIntent::YesNo { .. } => VotingMethod::YesNo,
            VoteIntent::YesNoAbstain { .. } => VotingMethod::YesNoAbstain,
            VoteIntent::Supermajority { .. } => VotingMethod::Supermajority,
            VoteIntent::RankedChoice { .. } => VotingMethod::RankedChoice,
            VoteIntent::TwoRound { .. } => VotingMethod::TwoRound,
            VoteIntent::Star { .. } => VotingMethod::Star,
            VoteIntent::Stv { .. } => VotingMethod::Stv,
            VoteIntent::Quadratic { .. } => VotingMethod::Quadratic,
            VoteIntent::Consensus { .. } => VotingMethod::Consensus,
            VoteIntent::ConsentBased { .. } => VotingMethod::ConsentBased,
        }
    }

    /// Validate the intent against a poll of `choice_count` choices.
    pub fn validate(&self, choice_count: usize, max_weight: Option<u64>) -> Result<(), VoteError> {
        let check_index = |index: usize| {
            if index >= choice_count {
                Err(VoteError::InvalidChoice {
                    index,
                    count: choice_count,
                })
            } else {
                Ok(())
            }
        };
        let check_rankings = |rankings: &[usize]| {
            let mut seen = vec![false; choice_count];
            for &index in rankings {
                check_index(index)?;
                if seen[index] {
                    return Err(VoteError::DuplicateRanking);
                }
                seen[index] = true;
            }
            Ok(())
        };

        match self {
            VoteIntent::Plurality { choice }
            | VoteIntent::TwoRound { choice }
            | VoteIntent::Supermajority { choice }
            | VoteIntent::Consensus { choice }
            | VoteIntent::ConsentBased { choice } => check_index(*choice),
            VoteIntent::YesNo { choice } | VoteIntent::YesNoAbstain { choice } => {
                check_index(*choice)
            }
            VoteIntent::Approval { choices } => {
                if choices.is_empty() {
                    return Err(VoteError::EmptyChoices);
                }
                let mut seen = vec![false; choice_count];
                for &index in choices {
                    check_index(index)?;
                    if seen[index] {
                        return Err(VoteError::DuplicateRanking);
                    }
                    seen[index] = true;
                }
                Ok(())
            }
            VoteIntent::Weighted { choice, weight } => {
                check_index(*choice)?;
                if *weight == 0 {
                    return Err(VoteError::WeightMustBePositive);
                }
                if let Some(max) = max_weight {
                    if *weight > max {
                        return Err(VoteError::WeightExceedsMaximum { max });
                    }
                }
                Ok(())
            }
            VoteIntent::Borda { rankings }
            | VoteIntent::RankedChoice { rankings }
            | VoteIntent::Stv { rankings } => check_rankings(rankings),
            VoteIntent::Score { choice, score } => {
                check_index(*choice)?;
                if *score > MAX_SCORE {
                    return Err(VoteError::ScoreOutOfRange {
                        score: *score,
                        max: MAX_SCORE,
                    });
                }
                Ok(())
            }
            VoteIntent::Star { scores } => {
                if scores.len() != choice_count {
                    return Err(VoteError::ScoreCountMismatch);
                }
                for &score in scores {
                    if score > MAX_STAR_SCORE {
                        return Err(VoteError::ScoreOutOfRange {
                            score,
                            max: MAX_STAR_SCORE,
                        });
                    }
                }
                Ok(())
            }
            VoteIntent::Quadratic { allocations } => {
                if allocations.len() != choice_count {
                    return Err(VoteError::ScoreCountMismatch);
                }
                Ok(())
            }
        }
    }

    /// The per-slot plaintexts this intent encodes to.
    fn slot_values(&self, choice_count: usize) -> Vec<u64> {
        let mut slots = vec![0u64; choice_count];
        match self {
            VoteIntent::Plurality { choice }
            | VoteIntent::TwoRound { choice }
            | VoteIntent::YesNo { choice }
            | VoteIntent::YesNoAbstain { choice }
            | VoteIntent::Supermajority { choice }
            | VoteIntent::Consensus { choice }
            | VoteIntent::ConsentBased { choice } => slots[*choice] = 1,
            VoteIntent::Approval { choices } => {
                for &choice in choices {
                    slots[choice] = 1;
                }
            }
            VoteIntent::Weighted { choice, weight } => slots[*choice] = *weight,
            VoteIntent::Borda { rankings } => {
                for (position, &choice) in rankings.iter().enumerate() {
                    slots[choice] = (choice_count - 1 - position) as u64;
                }
            }
            VoteIntent::Score { choice, score } => slots[*choice] = *score,
            VoteIntent::RankedChoice { rankings } | VoteIntent::Stv { rankings } => {
                // rank positions are one-based; zero means unranked
                for (position, &choice) in rankings.iter().enumerate() {
                    slots[choice] = position as u64 + 1;
                }
            }
            VoteIntent::Star { scores } => slots.copy_from_slice(scores),
            VoteIntent::Quadratic { allocations } => slots.copy_from_slice(allocations),
        }
        slots
    }
}

/// A vote as stored by a poll: the validated intent fields and one
/// Paillier ciphertext per choice slot.
#[derive(Debug, Clone)]
pub struct EncryptedVote {
    pub intent: VoteIntent,
    pub ciphertexts: Vec<BigUint>,
}

impl EncryptedVote {
    pub fn method(&self) -> VotingMethod {
        self.intent.method()
    }

    /// Canonical byte form, used for receipt commitments and audit
    /// hashes: method discriminant, then slot count, then length-prefixed
    /// ciphertexts.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.method().discriminant());
        out.extend_from_slice(&(self.ciphertexts.len() as u32).to_be_bytes());
        for ciphertext in &self.ciphertexts {
            out.extend_from_slice(&length_encode_data(&ciphertext.to_bytes_be()));
        }
        out
    }

    /// SHA-256 commitment over the canonical form.
    pub fn commitment(&self) -> [u8; 32] {
        let digest = Sha256::digest(self.canonical_bytes());
        digest.into()
    }
}

/// Encodes intents for one poll's key and choice count.
pub struct VoteEncoder<'a> {
    public_key: &'a PaillierPublicKey,
    choice_count: usize,
    max_weight: Option<u64>,
}

impl<'a> VoteEncoder<'a> {
    pub fn new(public_key: &'a PaillierPublicKey, choice_count: usize) -> Self {
        Self {
            public_key,
            choice_count,
            max_weight: None,
        }
    }

    pub fn with_max_weight(mut self, max_weight: Option<u64>) -> Self {
        self.max_weight = max_weight;
        self
    }

    /// Validate and encrypt an intent into its ciphertext vector.
    pub fn encode<R: RngCore + CryptoRng>(
        &self,
        intent: VoteIntent,
        mut rng: R,
    ) -> Result<EncryptedVote, VoteError> {
        intent.validate(self.choice_count, self.max_weight)?;

        let mut ciphertexts = Vec::with_capacity(self.choice_count);
        for value in intent.slot_values(self.choice_count) {
            let ciphertext = self
                .public_key
                .encrypt(&BigUint::from(value), &mut rng)?;
            ciphertexts.push(ciphertext);
        }

        Ok(EncryptedVote {
            intent,
            ciphertexts,
        })
    }
}
