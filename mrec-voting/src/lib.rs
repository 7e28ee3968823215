//! Verifiable-ballot engine.
//!
//! Votes are encoded as vectors of Paillier ciphertexts
//! ([`VoteEncoder`]), collected by a [`Poll`] that issues signed
//! receipts and keeps an append-only audit log, and counted by a
//! [`PollTallier`] that exploits additive homomorphism so that
//! fully-homomorphic methods never decrypt an individual ballot.

use thiserror::Error;

pub mod audit;
pub mod encoder;
pub mod factory;
pub mod method;
pub mod poll;
pub mod tally;

pub use audit::{AuditEntry, AuditEvent, AuditLog};
pub use encoder::{EncryptedVote, VoteEncoder, VoteIntent};
pub use factory::{PollFactory, PollOptions};
pub use method::{SecurityLevel, SupermajorityConfig, VotingMethod};
pub use poll::{Poll, PollParams, VoteReceipt};
pub use tally::{PollResults, PollTallier, TallyRound};

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("a poll needs at least two choices, got {0}")]
    TooFewChoices(usize),
    #[error("method {0:?} is insecure and the poll does not allow insecure methods")]
    InsecureMethodNotAllowed(method::VotingMethod),
    #[error("invalid supermajority threshold {numerator}/{denominator}")]
    InvalidSupermajority { numerator: u64, denominator: u64 },
    #[error("choice index {index} out of range for {count} choices")]
    InvalidChoice { index: usize, count: usize },
    #[error("approval vote must select at least one choice")]
    EmptyChoices,
    #[error("rankings contain a duplicate entry")]
    DuplicateRanking,
    #[error("weight must be positive")]
    WeightMustBePositive,
    #[error("weight exceeds the poll maximum of {max}")]
    WeightExceedsMaximum { max: u64 },
    #[error("score {score} exceeds the maximum of {max}")]
    ScoreOutOfRange { score: u64, max: u64 },
    #[error("score vector must have one entry per choice")]
    ScoreCountMismatch,
    #[error("encrypted vote carries no ciphertexts")]
    EmptyEncryptedVote,
    #[error("encrypted vote has {actual} ciphertexts, poll has {expected} choices")]
    CiphertextCountMismatch { expected: usize, actual: usize },
    #[error("vote was encoded for method {vote:?} but the poll uses {poll:?}")]
    MethodMismatch {
        poll: method::VotingMethod,
        vote: method::VotingMethod,
    },
    #[error("poll is closed")]
    PollClosed,
    #[error("voter has already voted")]
    AlreadyVoted,
    #[error("poll is already closed")]
    AlreadyClosed,
    #[error("poll must be closed before tallying")]
    NotClosed,
    #[error(transparent)]
    Paillier(#[from] mrec_paillier::Error),
}

impl VoteError {
    pub fn reason_key(&self) -> &'static str {
        match self {
            VoteError::TooFewChoices(_) => "error.vote.tooFewChoices",
            VoteError::InsecureMethodNotAllowed(_) => "error.vote.insecureMethodNotAllowed",
            VoteError::InvalidSupermajority { .. } => "error.vote.invalidSupermajority",
            VoteError::InvalidChoice { .. } => "error.vote.invalidChoice",
            VoteError::EmptyChoices => "error.vote.emptyChoices",
            VoteError::DuplicateRanking => "error.vote.duplicateRanking",
            VoteError::WeightMustBePositive => "error.vote.weightMustBePositive",
            VoteError::WeightExceedsMaximum { .. } => "error.vote.weightExceedsMaximum",
            VoteError::ScoreOutOfRange { .. } => "error.vote.scoreOutOfRange",
            VoteError::ScoreCountMismatch => "error.vote.scoreCountMismatch",
            VoteError::EmptyEncryptedVote => "error.vote.emptyEncryptedVote",
            VoteError::CiphertextCountMismatch { .. } => "error.vote.ciphertextCountMismatch",
            VoteError::MethodMismatch { .. } => "error.vote.methodMismatch",
            VoteError::PollClosed => "error.vote.pollClosed",
            VoteError::AlreadyVoted => "error.vote.alreadyVoted",
            VoteError::AlreadyClosed => "error.vote.alreadyClosed",
            VoteError::NotClosed => "error.vote.notClosed",
            VoteError::Paillier(_) => "error.vote.paillier",
        }
    }
}
